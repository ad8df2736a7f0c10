//! Term ingestion, compilation, and streaming evaluation.
//!
//! A query arrives as a raw JSON term tree. This crate turns it into
//! something the session layer can drive:
//!
//! 1. [`TermStorage`] parses the wire form into an arena of term nodes
//! 2. [`preprocess_term_tree`] walks the arena, recording a backtrace
//!    path for every node into a [`BacktraceRegistry`]
//! 3. [`compile_term`] lowers the arena into an evaluable tree
//! 4. [`CompiledTerm::eval`] produces a [`Val`]: a datum, grouped data,
//!    or a lazy [`DatumStream`] consumed one batch at a time
//!
//! Evaluation is cancellable throughout via [`Interruptor`] and the
//! two-input [`CompositeInterruptor`] combinator.

pub mod compile;
pub mod env;
pub mod error;
pub mod eval;
pub mod interruptor;
pub mod profile;
pub mod stream;
pub mod term;
pub mod walker;

pub use compile::{compile_term, ArithOp, CompileEnv, CompiledTerm};
pub use env::{EvalEnv, GlobalOptArgs, DEFAULT_ARRAY_LIMIT, DEFAULT_MAX_BATCH_ROWS};
pub use error::{EvalError, EvalResult};
pub use eval::Val;
pub use interruptor::{CompositeInterruptor, Interruptor};
pub use profile::ProfileTrace;
pub use stream::{BatchSpec, BatchType, ChangesFeed, DatumStream, FeedType, RangeStream};
pub use term::{TermId, TermStorage, TermType};
pub use walker::{preprocess_term_tree, BacktraceRegistry};
