//! Core vocabulary for the document query protocol.
//!
//! This crate holds the types every other crate speaks in:
//!
//! - **Datums**: JSON values plus the total order and pseudotype helpers
//!   the protocol defines over them
//! - **Protocol enums**: query operations, response types, and response
//!   notes with their wire numbers
//! - **Backtraces**: the root-to-term frame paths attached to error
//!   responses
//! - **Errors**: the classified error carrier that crosses the query
//!   cache boundary

pub mod backtrace;
pub mod datum;
pub mod error;
pub mod proto;

pub use backtrace::{QueryBacktrace, Frame};
pub use datum::Datum;
pub use error::{Error, ErrorKind, Result};
pub use proto::{QueryOp, ResponseNote, ResponseType};
