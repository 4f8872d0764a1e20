/// Workflow management REST API endpoints
///
/// CRUD over workflow graphs plus the planner trigger. Saves hot-reload the
/// catalog, so a graph is executable as soon as the response returns.

use crate::api::{api_error, not_found, ApiError, AppState};
use crate::ontology::Ontology;
use crate::service::{PlanningSummary, SavedWorkflow};
use crate::workflow::types::{GraphView, WorkflowGraph};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: WorkflowGraph,
}

/// A stored graph together with its derived editor view
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub workflow: WorkflowGraph,
    pub graph: GraphView,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(save_workflow).get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow).delete(deactivate_workflow))
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/planner", post(run_planner))
}

/// Create or update a workflow (upsert by name)
///
/// POST /api/workflows
/// Body: { "workflow": { "name": "...", "steps": [...], "edges": [...] } }
async fn save_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<SavedWorkflow>, ApiError> {
    let saved = state
        .service
        .save_workflow(payload.workflow)
        .await
        .map_err(api_error)?;
    Ok(Json(saved))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.service.list_workflows().await.map_err(api_error)?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = state
        .service
        .get_workflow(id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("workflow"))?;
    let graph = workflow.graph_view();
    Ok(Json(WorkflowResponse { workflow, graph }))
}

/// Soft-delete a workflow
///
/// DELETE /api/workflows/{id}
async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if state.service.deactivate_workflow(id).await.map_err(api_error)? {
        Ok(Json(json!({ "message": "Workflow deactivated" })))
    } else {
        Err(not_found("workflow"))
    }
}

/// Undo a soft delete
///
/// POST /api/workflows/{id}/activate
async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if state.service.activate_workflow(id).await.map_err(api_error)? {
        Ok(Json(json!({ "message": "Workflow activated" })))
    } else {
        Err(not_found("workflow"))
    }
}

/// Generate and persist every workflow the ontology implies
///
/// POST /api/planner
/// Body: { "entities": [...], "relations": [...], "rules": [...] }
async fn run_planner(
    State(state): State<AppState>,
    Json(ontology): Json<Ontology>,
) -> Result<Json<PlanningSummary>, ApiError> {
    let summary = state
        .service
        .plan_and_persist(&ontology)
        .await
        .map_err(api_error)?;
    Ok(Json(summary))
}
