//! TCP server for the document query protocol.
//!
//! Each connection gets its own [`reql_session::QueryCache`]; every
//! incoming frame is dispatched on its own task, so queries on distinct
//! tokens proceed concurrently while the per-entry mutex serializes
//! same-token operations.

mod conn;
pub mod server;
pub mod wire;

pub use server::Server;
