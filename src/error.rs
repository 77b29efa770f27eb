use thiserror::Error;

/// Error taxonomy for the storage/query dataplane.
///
/// Variants are kinds, not types: callers match on the kind to decide how to
/// react (retry, drop-and-continue, surface to the user), the way
/// `vast::ec` does in the original system.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported artifact version {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("logic error: {0}")]
    LogicError(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("persist aborted: {0}")]
    PersistAborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Filesystem(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Error {
        Error::Cancelled(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Error {
        Error::Parse(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Error {
        Error::Cancelled("receiving component has shut down".to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Error {
        Error::Cancelled("response channel dropped before answering".to_string())
    }
}
