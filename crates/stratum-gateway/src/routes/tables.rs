//! Table discovery endpoint.

use axum::{extract::State, routing::get, Json, Router};
use stratum_core::record::TableSummary;

use crate::auth::Session;
use crate::AppState;

/// Table routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/tables", get(list_tables))
}

/// Tables the caller may read.
async fn list_tables(
    State(state): State<AppState>,
    Session(session): Session,
) -> Json<Vec<TableSummary>> {
    Json(state.service.readable_tables(&session))
}
