//! Per-connection registry of in-flight and partially-consumed queries.
//!
//! Clients tag queries with numeric tokens and iterate large result
//! sets across multiple round-trips. The [`QueryCache`] is the
//! coordination point for one connection:
//!
//! - **Registration**: `START` compiles a query and stores its entry
//!   under the client's token
//! - **Serialization**: all operations on one token go through a
//!   [`QueryRef`], a scoped handle holding the entry's fair mutex
//! - **Lifecycle**: entries move `Start → Stream → Done → Deleting`,
//!   and are disposed of asynchronously once every ref has drained
//! - **Cancellation**: a per-request interruptor, a client `STOP`, or
//!   an admin kill via the [`JobsRegistry`] can all abort evaluation
//! - **Barriers**: `NOREPLY_WAIT` blocks until every earlier query id
//!   has been released by the [`QueryIdTracker`]

pub mod cache;
pub mod drainer;
mod entry;
pub mod handle;
pub mod jobs;
pub mod params;
pub mod query_id;
pub mod response;

pub use cache::QueryCache;
pub use drainer::{Drainer, DrainerLock};
pub use handle::QueryRef;
pub use jobs::{JobsRegistry, QueryJob};
pub use params::QueryParams;
pub use query_id::{QueryId, QueryIdTracker};
pub use response::Response;
