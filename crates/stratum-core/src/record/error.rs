//! Record API errors.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised while serving a record request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The operation needs an authenticated session.
    #[error("Authentication required")]
    Unauthenticated,

    /// The session may see the record but not perform the operation.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Absent or hidden record.
    #[error("Record not found")]
    NotFound,

    /// Unknown table.
    #[error("Table not found")]
    TableNotFound,

    /// A value violates a field constraint.
    #[error("{message}")]
    ConstraintViolation {
        /// Semantic constraint name, e.g. `employees_email_key`.
        constraint: String,
        /// Human readable description.
        message: String,
    },

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Storage is temporarily unavailable; the request may be retried.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RecordError {
    /// HTTP status code of the error.
    pub fn status_code(&self) -> u16 {
        match self {
            RecordError::Unauthenticated => 401,
            RecordError::Forbidden(_) => 403,
            RecordError::NotFound | RecordError::TableNotFound => 404,
            RecordError::ConstraintViolation { .. } | RecordError::BadRequest(_) => 400,
            RecordError::StorageUnavailable(_) => 503,
            RecordError::Storage(_) => 500,
        }
    }

    /// Check if retrying the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecordError::StorageUnavailable(_))
    }

    pub(crate) fn violation(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        RecordError::ConstraintViolation {
            constraint: constraint.into(),
            message: message.into(),
        }
    }
}

impl From<StorageError> for RecordError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(_) | StorageError::Unavailable(_) => {
                RecordError::StorageUnavailable(err.to_string())
            }
            StorageError::Conflict { constraint } => {
                let message = format!("Value violates constraint {constraint}");
                RecordError::ConstraintViolation {
                    constraint,
                    message,
                }
            }
            StorageError::Backend(message) => RecordError::Storage(message),
        }
    }
}

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RecordError::Unauthenticated.status_code(), 401);
        assert_eq!(RecordError::NotFound.status_code(), 404);
        assert_eq!(RecordError::NotFound.to_string(), "Record not found");
        assert_eq!(RecordError::Forbidden("x".into()).status_code(), 403);
    }

    #[test]
    fn test_from_storage_error() {
        let err: RecordError = StorageError::Conflict {
            constraint: "users_email_key".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            RecordError::ConstraintViolation { ref constraint, .. } if constraint == "users_email_key"
        ));

        let err: RecordError = StorageError::Timeout(std::time::Duration::from_secs(1)).into();
        assert_eq!(err.status_code(), 503);
        assert!(err.is_retryable());
    }
}
