//! Crate-level error type.

use thiserror::Error;

use crate::compiler::SchemaError;
use crate::record::RecordError;
use crate::storage::StorageError;

/// Any error raised by Stratum.
#[derive(Debug, Error)]
pub enum Error {
    /// Schema compilation failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A record request failed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Storage failed outside a record request.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
