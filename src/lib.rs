/// Ontoflow: ontology-driven workflow planning and execution engine
///
/// Turns an ontology (entities, relations, rules) into validated workflow
/// graphs and runs them step by step against a knowledge store, with a
/// persisted execution record and trace for every run.

// Core configuration and setup
pub mod config;

// Engine error types
pub mod error;

// Entity, relation and rule definitions the planner reads
pub mod ontology;

// Workflow graphs: model, templates, validation, storage, catalog
pub mod workflow;

// Knowledge store abstraction and backends
pub mod knowledge;

// Step trait, action kinds, registry and built-in operations
pub mod steps;

// Runtime execution engine - wave-based graph traversal
pub mod runtime;

// Ontology -> workflow graph generation
pub mod planner;

// Persisted execution records
pub mod execution;

// Save/plan/execute orchestration over storage and the executor
pub mod service;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, GraphValidationError, RoutingError, StepError, StepExecutionError};
pub use execution::{ExecutionRecord, ExecutionStatus};
pub use ontology::Ontology;
pub use planner::{plan, PlanReport};
pub use runtime::{ExecutionFailure, ExecutionState, WorkflowExecutor};
pub use server::start_server;
pub use service::{ServiceError, WorkflowService};
pub use steps::{ActionKind, Step, StepRegistry, StepRegistryBuilder};
pub use workflow::{ValidatedGraph, WorkflowGraph};
