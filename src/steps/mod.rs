/// Step registry and built-in operations
///
/// A step is one named unit of work the executor invokes by key. Built-in
/// keys form a closed `ActionKind` union; user operations register under
/// `ActionKind::Custom`. Every step receives its already-resolved params and
/// a read-only snapshot of the run, and returns an output object plus any
/// context entries it wants to publish.

pub mod entity;
pub mod query;
pub mod registry;
pub mod rules;
pub mod validate;

pub use registry::{StepRegistry, StepRegistryBuilder};

use crate::error::StepError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Registry key of a step operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    ValidateInput,
    CreateEntity,
    UpdateEntity,
    FindEntities,
    DeleteEntity,
    ApplyRules,
    ExecuteCustomAction,
    CreateRelationship,
    SearchKnowledgeGraph,
    RankResults,
    UpdateKnowledgeGraph,
    FormatEntityData,
    ParseQuery,
    CheckDependencies,
    Custom(String),
}

impl ActionKind {
    pub const BUILTIN: [ActionKind; 14] = [
        ActionKind::ValidateInput,
        ActionKind::CreateEntity,
        ActionKind::UpdateEntity,
        ActionKind::FindEntities,
        ActionKind::DeleteEntity,
        ActionKind::ApplyRules,
        ActionKind::ExecuteCustomAction,
        ActionKind::CreateRelationship,
        ActionKind::SearchKnowledgeGraph,
        ActionKind::RankResults,
        ActionKind::UpdateKnowledgeGraph,
        ActionKind::FormatEntityData,
        ActionKind::ParseQuery,
        ActionKind::CheckDependencies,
    ];

    pub fn key(&self) -> &str {
        match self {
            ActionKind::ValidateInput => "validate-input",
            ActionKind::CreateEntity => "create-entity",
            ActionKind::UpdateEntity => "update-entity",
            ActionKind::FindEntities => "find-entities",
            ActionKind::DeleteEntity => "delete-entity",
            ActionKind::ApplyRules => "apply-rules",
            ActionKind::ExecuteCustomAction => "execute-custom-action",
            ActionKind::CreateRelationship => "create-relationship",
            ActionKind::SearchKnowledgeGraph => "search-knowledge-graph",
            ActionKind::RankResults => "rank-results",
            ActionKind::UpdateKnowledgeGraph => "update-knowledge-graph",
            ActionKind::FormatEntityData => "format-entity-data",
            ActionKind::ParseQuery => "parse-query",
            ActionKind::CheckDependencies => "check-dependencies",
            ActionKind::Custom(key) => key,
        }
    }

    /// Parse a key; singular aliases map to the built-in they name.
    pub fn from_key(key: &str) -> Self {
        match key {
            "find-entity" => ActionKind::FindEntities,
            "apply-rule" => ActionKind::ApplyRules,
            other => ActionKind::BUILTIN
                .iter()
                .find(|kind| kind.key() == other)
                .cloned()
                .unwrap_or_else(|| ActionKind::Custom(other.to_string())),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ActionKind::Custom(_))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl From<String> for ActionKind {
    fn from(key: String) -> Self {
        ActionKind::from_key(&key)
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.key().to_string()
    }
}

/// Everything a step sees when it runs.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub step_id: String,
    /// Params with every template already resolved
    pub params: Value,
    pub inputs: Value,
    pub context: Map<String, Value>,
}

impl StepInput {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    /// Required string param.
    pub fn require_str(&self, name: &str) -> Result<&str, StepError> {
        self.param_str(name)
            .ok_or_else(|| StepError::invalid(format!("missing string parameter '{}'", name)))
    }

    /// Deserialize the params object into a typed shape.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(self.params.clone()).map_err(|e| StepError::invalid(e.to_string()))
    }
}

/// What a step hands back to the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub output: Value,
    pub context: Map<String, Value>,
}

impl StepOutcome {
    /// Output object with `status: "completed"` added.
    pub fn completed(fields: Value) -> Self {
        let mut output = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        output.insert("status".to_string(), Value::String("completed".to_string()));
        Self {
            output: Value::Object(output),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError>;
}

/// Object-typed param or an empty map when absent.
pub(crate) fn object_param(input: &StepInput, name: &str) -> Result<Map<String, Value>, StepError> {
    match input.param(name) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(StepError::invalid(format!(
            "parameter '{}' must be an object, got {}",
            name, other
        ))),
    }
}
