use crate::backtrace::QueryBacktrace;
use crate::proto::ResponseType;
use thiserror::Error;

/// Classification of a failed query, mapping 1:1 to an error response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    Compile,
    Runtime,
}

impl ErrorKind {
    pub fn response_type(self) -> ResponseType {
        match self {
            ErrorKind::Client => ResponseType::ClientError,
            ErrorKind::Compile => ResponseType::CompileError,
            ErrorKind::Runtime => ResponseType::RuntimeError,
        }
    }
}

/// Error carrier crossing the query cache boundary.
///
/// `Reql` failures are rendered to the client as the wire response type
/// matching their kind; `Interrupted` means the per-request interruptor
/// fired and the connection is going away, so nothing is rendered.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{message}")]
    Reql {
        kind: ErrorKind,
        message: String,
        bt: QueryBacktrace,
    },

    #[error("operation interrupted")]
    Interrupted,
}

impl Error {
    pub fn client(message: impl Into<String>) -> Self {
        Error::Reql {
            kind: ErrorKind::Client,
            message: message.into(),
            bt: QueryBacktrace::EMPTY,
        }
    }

    pub fn compile(message: impl Into<String>, backtrace: QueryBacktrace) -> Self {
        Error::Reql {
            kind: ErrorKind::Compile,
            message: message.into(),
            bt: backtrace,
        }
    }

    pub fn runtime(message: impl Into<String>, backtrace: QueryBacktrace) -> Self {
        Error::Reql {
            kind: ErrorKind::Runtime,
            message: message.into(),
            bt: backtrace,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
