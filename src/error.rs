/// Engine error types
///
/// Every failure the planner, validator and executor can surface. Storage and
/// server wiring stay on `anyhow` like the rest of the binary; these typed
/// errors are what callers match on.

use crate::knowledge::StoreError;
use crate::workflow::validator::Violation;
use thiserror::Error;

/// A workflow graph failed validation at save time.
///
/// Carries every violated rule, not just the first one found.
#[derive(Debug, Clone, Error)]
#[error("workflow '{workflow}' failed validation: {}", format_violations(.violations))]
pub struct GraphValidationError {
    pub workflow: String,
    pub violations: Vec<Violation>,
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// No outgoing edge of a completed step could be selected.
#[derive(Debug, Clone, Error)]
#[error("routing failed after step '{step}': {reason}")]
pub struct RoutingError {
    pub step: String,
    pub reason: String,
}

/// Failure raised by a single step operation.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("entity '{id}' still has {count} dependent relationship(s)")]
    HasDependencies { id: String, count: usize },

    #[error("knowledge store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

/// A registered operation threw while the executor was running it.
#[derive(Debug, Error)]
#[error("step '{step}' ({action}) failed: {source}")]
pub struct StepExecutionError {
    pub step: String,
    pub action: String,
    #[source]
    pub source: StepError,
}

/// Errors from the step registry builder.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("step '{0}' is already registered")]
    DuplicateStep(String),
}

/// Unified error surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    GraphValidation(#[from] GraphValidationError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    StepExecution(#[from] StepExecutionError),

    #[error("workflow '{0}' does not exist or is inactive")]
    UnknownWorkflow(String),

    #[error("step '{step}' references unregistered action '{action}'")]
    UnknownStep { step: String, action: String },
}
