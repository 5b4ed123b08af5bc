//! Review error types

use thiserror::Error;

use super::store::StoreError;

/// Errors raised by the scheduler, queues and coordinator
#[derive(Debug, Error)]
pub enum ReviewError {
    /// The operation is not valid in the current state (a caller bug)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A grade/state pair the operation cannot handle
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ReviewError> for String {
    fn from(err: ReviewError) -> Self {
        err.to_string()
    }
}

/// Result type alias for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;
