/// Execution endpoints

use crate::api::{api_error, not_found, ApiError, AppState};
use crate::execution::ExecutionRecord;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
}

/// POST /api/workflows/{id}/execute
/// Body: { "inputs": {...}, "sessionId": "..." }
///
/// A failed run answers 422 with the persisted FAILED record attached.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let inputs = match request.inputs {
        Value::Null => Value::Object(Default::default()),
        inputs => inputs,
    };
    let record = state
        .service
        .execute(id, inputs, request.session_id)
        .await
        .map_err(api_error)?;
    Ok(Json(record))
}

/// GET /api/workflows/{id}/executions?limit=20
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let records = state
        .service
        .list_executions(id, limit)
        .await
        .map_err(api_error)?;
    Ok(Json(records))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    state
        .service
        .get_execution(id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| not_found("execution"))
}
