/// Runtime Execution Engine
///
/// Interprets validated workflow graphs:
/// - Per-run `ExecutionState` with an append-only trace
/// - Wave-based traversal with concurrent dispatch of independent steps
/// - Guarded routing, skip propagation and failure cleanup

// Per-run state and trace entries
pub mod state;

// Graph walker and step dispatch
pub mod engine;

pub use engine::{ExecutionFailure, WorkflowExecutor};
pub use state::{ExecutionState, Timing, TraceEntry, TraceStatus};
