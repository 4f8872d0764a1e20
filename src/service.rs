/// Workflow service
///
/// The layer around the engine: it saves and deactivates graphs (keeping the
/// catalog hot), persists planner output with upsert-by-name, and owns the
/// `ExecutionRecord` lifecycle of every run.

use crate::error::{EngineError, GraphValidationError};
use crate::execution::{ExecutionRecord, ExecutionStorage};
use crate::ontology::Ontology;
use crate::planner::{self, PlanningFailure};
use crate::runtime::WorkflowExecutor;
use crate::steps::StepRegistry;
use crate::workflow::{
    SaveOutcome, WorkflowCatalog, WorkflowGraph, WorkflowMetadata, WorkflowStorage, Warning,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] GraphValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The run was rejected; the record is already persisted as FAILED.
    #[error("execution {} failed: {source}", .record.id)]
    ExecutionFailed {
        record: Box<ExecutionRecord>,
        source: EngineError,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A stored graph plus what saving it did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedWorkflow {
    pub id: Uuid,
    pub name: String,
    pub outcome: SaveOutcome,
    pub warnings: Vec<String>,
}

/// Result of one planner run after persistence.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub failures: Vec<PlanningFailure>,
}

pub struct WorkflowService {
    workflows: WorkflowStorage,
    catalog: WorkflowCatalog,
    executions: ExecutionStorage,
    executor: WorkflowExecutor,
}

impl WorkflowService {
    pub fn new(workflows: WorkflowStorage, executions: ExecutionStorage, steps: Arc<StepRegistry>) -> Self {
        Self {
            catalog: WorkflowCatalog::new(workflows.clone()),
            workflows,
            executions,
            executor: WorkflowExecutor::new(steps),
        }
    }

    /// Create tables and load the catalog.
    pub async fn init(&self) -> anyhow::Result<()> {
        self.workflows.init_schema().await?;
        self.executions.init_schema().await?;
        self.catalog.init_from_storage().await
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Validate and persist a graph, then hot-reload it. The graph's
    /// `is_active` flag is applied as given.
    pub async fn save_workflow(&self, graph: WorkflowGraph) -> Result<SavedWorkflow, ServiceError> {
        self.store(graph, true).await
    }

    /// Planner output keeps whatever activation the stored row already has,
    /// so a deactivated graph stays deactivated across re-planning.
    async fn store(&self, graph: WorkflowGraph, apply_activation: bool) -> Result<SavedWorkflow, ServiceError> {
        let warnings: Vec<String> = graph
            .clone()
            .validate()?
            .warnings()
            .iter()
            .map(Warning::to_string)
            .collect();

        let requested = graph.is_active;
        let (mut stored, outcome) = self.workflows.upsert_by_name(graph).await?;
        if apply_activation && stored.is_active != requested {
            self.workflows.set_active(stored.id, requested).await?;
            stored.is_active = requested;
        }

        let saved = SavedWorkflow {
            id: stored.id,
            name: stored.name.clone(),
            outcome,
            warnings,
        };

        if stored.is_active {
            self.catalog.insert(stored.validate()?);
        } else {
            self.catalog.remove(saved.id);
        }

        tracing::info!("💾 Saved workflow '{}' ({:?})", saved.name, saved.outcome);
        Ok(saved)
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowGraph>, ServiceError> {
        Ok(self.workflows.get(id).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, ServiceError> {
        Ok(self.workflows.list().await?)
    }

    /// Soft-delete. Returns false when the graph does not exist.
    pub async fn deactivate_workflow(&self, id: Uuid) -> Result<bool, ServiceError> {
        let found = self.workflows.deactivate(id).await?;
        self.catalog.remove(id);
        if found {
            tracing::info!("🛑 Deactivated workflow {}", id);
        }
        Ok(found)
    }

    /// Reactivate a soft-deleted graph. Returns false when it does not exist.
    pub async fn activate_workflow(&self, id: Uuid) -> Result<bool, ServiceError> {
        if !self.workflows.set_active(id, true).await? {
            return Ok(false);
        }
        if let Some(graph) = self.workflows.get(id).await? {
            self.catalog.insert(graph.validate()?);
        }
        tracing::info!("▶️ Activated workflow {}", id);
        Ok(true)
    }

    /// Run the planner and persist its batch, one graph at a time.
    pub async fn plan_and_persist(&self, ontology: &Ontology) -> Result<PlanningSummary, ServiceError> {
        let report = planner::plan(ontology);
        let mut summary = PlanningSummary {
            failures: report.failures,
            ..PlanningSummary::default()
        };

        for graph in report.graphs {
            let name = graph.name.clone();
            match self.store(graph, false).await {
                Ok(saved) if saved.outcome == SaveOutcome::Created => summary.created.push(name),
                Ok(_) => summary.updated.push(name),
                Err(ServiceError::Storage(error)) => return Err(ServiceError::Storage(error)),
                Err(error) => summary.failures.push(PlanningFailure {
                    unit: format!("workflow '{}'", name),
                    reason: error.to_string(),
                }),
            }
        }

        tracing::info!(
            "🧭 Planner persisted {} new and {} updated workflows",
            summary.created.len(),
            summary.updated.len()
        );
        Ok(summary)
    }

    /// Execute an active workflow and persist its record through every
    /// status transition.
    #[tracing::instrument(skip(self, inputs))]
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        inputs: Value,
        session_id: Option<String>,
    ) -> Result<ExecutionRecord, ServiceError> {
        let graph = self
            .catalog
            .get(workflow_id)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_string()))?;

        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut record = ExecutionRecord::pending(workflow_id, session_id, inputs.clone());
        self.executions.save(&record).await?;

        record.mark_running();
        self.executions.save(&record).await?;

        match self.executor.execute(&graph, inputs).await {
            Ok(state) => {
                record.complete(&state);
                self.executions.save(&record).await?;
                Ok(record)
            }
            Err(failure) => {
                record.fail(&failure.error.to_string(), Some(&failure.state));
                self.executions.save(&record).await?;
                Err(ServiceError::ExecutionFailed {
                    record: Box::new(record),
                    source: failure.error,
                })
            }
        }
    }

    /// Execute by generated name, e.g. `create-customer`.
    pub async fn execute_by_name(
        &self,
        name: &str,
        inputs: Value,
        session_id: Option<String>,
    ) -> Result<ExecutionRecord, ServiceError> {
        let graph = self
            .catalog
            .find_by_name(name)
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))?;
        self.execute(graph.id(), inputs, session_id).await
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>, ServiceError> {
        Ok(self.executions.get(id).await?)
    }

    pub async fn list_executions(&self, workflow_id: Uuid, limit: u32) -> Result<Vec<ExecutionRecord>, ServiceError> {
        Ok(self.executions.list_for_workflow(workflow_id, limit).await?)
    }
}
