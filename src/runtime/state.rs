/// Per-run execution state
///
/// Owned by exactly one executor run. `inputs` never changes after the run
/// starts; `outputs` and `executionTrace` only grow; `context` is a shared
/// scratch map steps may publish into; `error` is set once, on the first
/// failure.

use crate::workflow::template::ResolveScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// When a step attempt entered `running` and when it settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub started_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
}

impl Timing {
    /// A zero-length attempt at the current instant.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            settled_at: now,
        }
    }
}

/// One settled step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub step_id: String,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the step entered `running`
    pub started_at: DateTime<Utc>,
    /// When the step settled
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn completed(step_id: &str, result: Value, timing: Timing) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: TraceStatus::Completed,
            result: Some(result),
            error: None,
            started_at: timing.started_at,
            timestamp: timing.settled_at,
        }
    }

    pub fn failed(step_id: &str, error: String, timing: Timing) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: TraceStatus::Failed,
            result: None,
            error: Some(error),
            started_at: timing.started_at,
            timestamp: timing.settled_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    inputs: Value,
    outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_step: Option<String>,
    execution_trace: Vec<TraceEntry>,
    context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ExecutionState {
    pub fn new(inputs: Value) -> Self {
        Self {
            inputs,
            outputs: Map::new(),
            current_step: None,
            execution_trace: Vec::new(),
            context: Map::new(),
            error: None,
        }
    }

    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.outputs.get(step_id)
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.execution_trace
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Step ids with a completed trace entry, in settlement order.
    pub fn completed_steps(&self) -> Vec<&str> {
        self.execution_trace
            .iter()
            .filter(|e| e.status == TraceStatus::Completed)
            .map(|e| e.step_id.as_str())
            .collect()
    }

    pub fn scope(&self) -> ResolveScope<'_> {
        ResolveScope {
            inputs: &self.inputs,
            outputs: &self.outputs,
            context: &self.context,
        }
    }

    pub(crate) fn enter(&mut self, step_id: &str) {
        self.current_step = Some(step_id.to_string());
    }

    pub(crate) fn complete(&mut self, step_id: &str, output: Value, context: Map<String, Value>, timing: Timing) {
        self.execution_trace
            .push(TraceEntry::completed(step_id, output.clone(), timing));
        self.outputs.insert(step_id.to_string(), output);
        self.context.extend(context);
    }

    pub(crate) fn fail(&mut self, step_id: &str, error: String, timing: Timing) {
        if self.error.is_none() {
            self.error = Some(error.clone());
        }
        self.execution_trace
            .push(TraceEntry::failed(step_id, error, timing));
    }

    /// Record a run-level failure not tied to a step attempt.
    pub(crate) fn abort(&mut self, error: String) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
