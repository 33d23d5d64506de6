//! Error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stratum_core::RecordError;
use tracing::error;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A record request failed.
    #[error(transparent)]
    Record(#[from] RecordError),
    /// The bearer token is missing its scheme, malformed or not valid.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Malformed query string or body.
    #[error("{0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub error: String,
}

impl AppError {
    /// HTTP status of the error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Record(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Record(RecordError::Storage(detail)) => {
                error!(error = %detail, "storage failure");
                "Internal server error".to_string()
            }
            AppError::Record(err) => err.to_string(),
            AppError::InvalidToken(_) => "Invalid token".to_string(),
            AppError::BadRequest(msg) => msg,
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::from(RecordError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(RecordError::StorageUnavailable("busy".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::InvalidToken("bad".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(AppError::from(RecordError::NotFound).to_string(), "Record not found");
        assert_eq!(
            AppError::InvalidToken("expired".into()).to_string(),
            "invalid token: expired"
        );
        assert_eq!(AppError::BadRequest("bad sort".into()).to_string(), "bad sort");
    }
}
