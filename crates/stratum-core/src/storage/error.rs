//! Storage errors.

use thiserror::Error;

/// Errors raised by a [`RecordStore`](super::RecordStore) or the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A storage call did not finish in time.
    #[error("storage call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No lease could be obtained or the backend is unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A unique, primary key or check constraint was violated.
    #[error("constraint {constraint} violated")]
    Conflict {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Check if retrying the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Unavailable(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
