use crate::term::TermId;
use thiserror::Error;

/// Evaluator-internal error carrier.
///
/// `Runtime` failures carry the id of the term they originated from so
/// the session layer can look up a backtrace; `Datum` failures arise
/// from malformed raw input before any term exists to point at.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("operation interrupted")]
    Interrupted,

    #[error("{message}")]
    Runtime {
        message: String,
        term: Option<TermId>,
    },

    #[error("{message}")]
    Datum { message: String },
}

impl EvalError {
    pub fn runtime(term: TermId, message: impl Into<String>) -> Self {
        EvalError::Runtime {
            message: message.into(),
            term: Some(term),
        }
    }

    pub fn datum(message: impl Into<String>) -> Self {
        EvalError::Datum {
            message: message.into(),
        }
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
