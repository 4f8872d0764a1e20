/// Execution records
///
/// The persisted lifecycle of one executor run. A record is created
/// `PENDING`, moves to `RUNNING` right before the executor is invoked and to
/// `COMPLETED` or `FAILED` once it returns. Its final outputs and trace are
/// copied from the run's `ExecutionState`.

pub mod storage;

use crate::runtime::{ExecutionState, TraceEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub use storage::ExecutionStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Reserved; nothing cancels runs yet.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending   => write!(f, "PENDING"),
            Self::Running   => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed    => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING"   => Ok(Self::Pending),
            "RUNNING"   => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED"    => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub session_id: String,
    pub status: ExecutionStatus,
    pub inputs: Value,
    pub outputs: Map<String, Value>,
    pub execution_trace: Vec<TraceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn pending(workflow_id: Uuid, session_id: impl Into<String>, inputs: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            session_id: session_id.into(),
            status: ExecutionStatus::Pending,
            inputs,
            outputs: Map::new(),
            execution_trace: Vec::new(),
            error_details: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_running(&mut self) {
        self.transition(ExecutionStatus::Running);
    }

    pub fn complete(&mut self, state: &ExecutionState) {
        self.absorb(state);
        self.transition(ExecutionStatus::Completed);
    }

    /// Record a failure. `state` is absent when the run never started.
    pub fn fail(&mut self, error: &str, state: Option<&ExecutionState>) {
        let mut details = json!({ "message": error });
        if let Some(state) = state {
            self.absorb(state);
            if let Some(step) = state.current_step() {
                details["step"] = json!(step);
            }
        }
        self.error_details = Some(details);
        self.transition(ExecutionStatus::Failed);
    }

    fn absorb(&mut self, state: &ExecutionState) {
        self.outputs = state.outputs().clone();
        self.execution_trace = state.trace().to_vec();
    }

    fn transition(&mut self, status: ExecutionStatus) {
        tracing::debug!("📝 Execution {} {} -> {}", self.id, self.status, status);
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn failure_keeps_partial_progress() {
        let mut record = ExecutionRecord::pending(Uuid::new_v4(), "s1", json!({}));
        record.mark_running();
        assert_eq!(record.status, ExecutionStatus::Running);

        let state = ExecutionState::new(json!({}));
        record.fail("step 'x' failed", Some(&state));
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.status.is_terminal());
        assert_eq!(record.error_details.as_ref().unwrap()["message"], "step 'x' failed");
    }
}
