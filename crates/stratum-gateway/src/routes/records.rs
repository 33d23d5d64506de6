//! Record endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use stratum_core::catalog::TableId;
use stratum_core::storage::Record;
use stratum_core::{ListQuery, ListResponse};

use crate::auth::Session;
use crate::error::AppError;
use crate::AppState;

/// Record routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/tables/:table_id/records", get(list_records).post(create_record))
        .route(
            "/api/tables/:table_id/records/:record_id",
            get(get_record).patch(update_record).delete(delete_record),
        )
        .route(
            "/api/tables/:table_id/records/:record_id/restore",
            post(restore_record),
        )
}

/// Query string of a list request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// JSON filter tree.
    pub filter: Option<String>,
    /// Comma separated sort fields, `-` for descending.
    pub sort: Option<String>,
    /// Page size.
    pub limit: Option<usize>,
    /// Records to skip.
    pub offset: Option<usize>,
    /// Comma separated aggregates, e.g. `count,sum:salary`.
    pub aggregate: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<ListQuery, AppError> {
        let mut query = ListQuery::new();
        if let Some(filter) = self.filter.as_deref() {
            query.filter = Some(ListQuery::parse_filter(filter)?);
        }
        if let Some(sort) = self.sort.as_deref() {
            query.sort = ListQuery::parse_sort(sort)?;
        }
        if let Some(aggregate) = self.aggregate.as_deref() {
            query.aggregates = ListQuery::parse_aggregates(aggregate)?;
        }
        query.limit = self.limit;
        query.offset = self.offset;
        Ok(query)
    }
}

/// Query string of a delete request.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    /// Remove the row even when the table supports soft delete.
    #[serde(default)]
    pub permanent: bool,
}

fn body(payload: Result<Json<Record>, JsonRejection>) -> Result<Record, AppError> {
    payload
        .map(|Json(record)| record)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

async fn list_records(
    State(state): State<AppState>,
    Session(session): Session,
    Path(table_id): Path<TableId>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.service.list(&session, table_id, &query).await?))
}

async fn get_record(
    State(state): State<AppState>,
    Session(session): Session,
    Path((table_id, record_id)): Path<(TableId, String)>,
) -> Result<Json<Record>, AppError> {
    Ok(Json(state.service.get(&session, table_id, &record_id).await?))
}

async fn create_record(
    State(state): State<AppState>,
    Session(session): Session,
    Path(table_id): Path<TableId>,
    payload: Result<Json<Record>, JsonRejection>,
) -> Result<(StatusCode, Json<Record>), AppError> {
    let values = body(payload)?;
    let record = state.service.create(&session, table_id, values).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record(
    State(state): State<AppState>,
    Session(session): Session,
    Path((table_id, record_id)): Path<(TableId, String)>,
    payload: Result<Json<Record>, JsonRejection>,
) -> Result<Json<Record>, AppError> {
    let values = body(payload)?;
    Ok(Json(
        state
            .service
            .update(&session, table_id, &record_id, values)
            .await?,
    ))
}

async fn delete_record(
    State(state): State<AppState>,
    Session(session): Session,
    Path((table_id, record_id)): Path<(TableId, String)>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, AppError> {
    state
        .service
        .delete(&session, table_id, &record_id, params.permanent)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_record(
    State(state): State<AppState>,
    Session(session): Session,
    Path((table_id, record_id)): Path<(TableId, String)>,
) -> Result<Json<Record>, AppError> {
    Ok(Json(state.service.restore(&session, table_id, &record_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::storage::AggregateFunction;

    #[test]
    fn test_list_params() {
        let params = ListParams {
            filter: Some(r#"{"field": "name", "operator": "equals", "value": "Ann"}"#.to_string()),
            sort: Some("-salary".to_string()),
            limit: Some(5),
            offset: None,
            aggregate: Some("count,avg:salary".to_string()),
        };
        let query = params.into_query().unwrap();
        assert!(query.filter.is_some());
        assert_eq!(query.sort.len(), 1);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.aggregates[1].function, AggregateFunction::Avg);
    }

    #[test]
    fn test_bad_filter() {
        let params = ListParams {
            filter: Some("{not json".to_string()),
            ..ListParams::default()
        };
        assert!(params.into_query().is_err());
    }
}
