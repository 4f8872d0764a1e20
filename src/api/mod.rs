/// HTTP API Layer
///
/// Thin REST surface over `WorkflowService`:
/// - Workflow CRUD (delete is a soft deactivate)
/// - Planner trigger
/// - Workflow execution and execution lookup

use crate::error::EngineError;
use crate::service::{ServiceError, WorkflowService};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

// Workflow management and planner endpoints
pub mod workflows;

// Execution endpoints
pub mod executions;

pub use executions::create_execution_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

pub(crate) type ApiError = (StatusCode, Json<Value>);

/// Map a service failure onto a status code and JSON body.
pub(crate) fn api_error(error: ServiceError) -> ApiError {
    match error {
        ServiceError::Validation(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": e.to_string(),
                "violations": e.violations.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            })),
        ),
        ServiceError::Engine(e @ EngineError::UnknownWorkflow(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        ServiceError::Engine(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        ),
        ServiceError::ExecutionFailed { record, source } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": source.to_string(), "execution": record })),
        ),
        ServiceError::Storage(e) => {
            tracing::error!("❌ Storage failure: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal storage error" })),
            )
        }
    }
}

pub(crate) fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{} not found", what) })))
}
