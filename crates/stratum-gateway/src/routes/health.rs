//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Name of the served application.
    pub app: String,
    /// Number of tables in the served application.
    pub tables: usize,
}

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let app = state.service.app();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app: app.name().to_string(),
        tables: app.tables().len(),
    })
}
