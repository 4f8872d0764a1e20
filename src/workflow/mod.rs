/// Workflow Management Layer
///
/// Workflow graph definitions and everything that happens to them before
/// execution:
/// - Graph model (steps, edges, derived views)
/// - Parameter templates and guard predicates
/// - Save-time validation into an executable `ValidatedGraph`
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload catalog using ArcSwap

// Core graph type definitions
pub mod types;

// `{{...}}` parameter templates
pub mod template;

// Edge guards and condition-step predicates
pub mod predicate;

// Structural and semantic validation
pub mod validator;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload catalog using ArcSwap for zero-downtime updates
pub mod registry;

pub use registry::WorkflowCatalog;
pub use storage::{SaveOutcome, WorkflowMetadata, WorkflowStorage};
pub use types::{Edge, EdgeCondition, StepKind, StepSpec, WorkflowGraph, END};
pub use validator::{validate, ValidatedGraph, Violation, Warning};
