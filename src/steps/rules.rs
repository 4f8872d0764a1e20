/// Rule application and custom action dispatch

use crate::error::StepError;
use crate::knowledge::KnowledgeStore;
use crate::steps::{Step, StepInput, StepOutcome};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// `apply-rules`: applies a rule's stored action to an entity.
///
/// Understood action shapes:
/// - `{"set": {field: value, ...}}` merges fields into the entity
/// - `{"type": "set", "field": f, "value": v}` sets a single field
/// - `{"type": "reject", "message": m}` fails the step
///
/// Anything else is recorded on the output without touching the store.
pub struct ApplyRules {
    store: Arc<dyn KnowledgeStore>,
}

impl ApplyRules {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self { store }
    }
}

fn field_changes(action: &Value) -> Option<Map<String, Value>> {
    if let Some(Value::Object(set)) = action.get("set") {
        return Some(set.clone());
    }
    if action.get("type").and_then(Value::as_str) == Some("set") {
        let field = action.get("field")?.as_str()?;
        let mut changes = Map::new();
        changes.insert(field.to_string(), action.get("value").cloned().unwrap_or(Value::Null));
        return Some(changes);
    }
    None
}

#[async_trait]
impl Step for ApplyRules {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let rule_id = input.param_str("ruleId").unwrap_or(&input.step_id).to_string();
        let action = input.param("action").cloned().unwrap_or(Value::Null);
        let entity_id = input.param_str("entityId").map(str::to_string);

        if action.get("type").and_then(Value::as_str) == Some("reject") {
            let message = action
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("rejected by rule");
            return Err(StepError::Failed(format!("rule '{}': {}", rule_id, message)));
        }

        let (applied, changes) = match (field_changes(&action), &entity_id) {
            (Some(changes), Some(id)) => {
                self.store.update_entity(id, changes.clone()).await?;
                (true, Value::Object(changes))
            }
            (Some(_), None) => {
                return Err(StepError::invalid(format!(
                    "rule '{}' changes fields but no entityId was given",
                    rule_id
                )))
            }
            (None, _) => (false, Value::Null),
        };

        tracing::debug!("📏 Rule {} applied={}", rule_id, applied);
        Ok(StepOutcome::completed(json!({
            "ruleId": rule_id,
            "entityId": entity_id,
            "applied": applied,
            "ruleResults": [{ "action": action, "changes": changes }],
        })))
    }
}

/// `execute-custom-action`: forwards `payload` to the custom step named by `action`.
pub struct ExecuteCustomAction {
    handlers: BTreeMap<String, Arc<dyn Step>>,
}

impl ExecuteCustomAction {
    pub fn new(handlers: BTreeMap<String, Arc<dyn Step>>) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl Step for ExecuteCustomAction {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let name = input.require_str("action")?.to_string();
        let handler = self.handlers.get(&name).cloned().ok_or_else(|| {
            StepError::Failed(format!("no custom action handler registered for '{}'", name))
        })?;

        let forwarded = StepInput {
            params: input.param("payload").cloned().unwrap_or(Value::Null),
            ..input
        };
        let mut outcome = handler.execute(forwarded).await?;
        if let Value::Object(map) = &mut outcome.output {
            map.insert("action".to_string(), Value::String(name));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::InMemoryKnowledgeStore;

    fn input(params: Value) -> StepInput {
        StepInput {
            step_id: "apply-rule-action".into(),
            params,
            inputs: Value::Null,
            context: Map::new(),
        }
    }

    #[tokio::test]
    async fn set_action_updates_entity() {
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new());
        let c = store.create_entity("Customer", Map::new()).await.unwrap();

        let out = ApplyRules::new(store.clone())
            .execute(input(json!({
                "ruleId": "vip",
                "entityId": c.id,
                "action": {"set": {"tier": "vip"}}
            })))
            .await
            .unwrap();
        assert_eq!(out.output["applied"], true);
        let stored = store.get_entity(&c.id).await.unwrap().unwrap();
        assert_eq!(stored.properties["tier"], "vip");
    }

    #[tokio::test]
    async fn opaque_action_is_recorded_only() {
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new());
        let out = ApplyRules::new(store)
            .execute(input(json!({"ruleId": "notify", "action": {"type": "notify", "channel": "email"}})))
            .await
            .unwrap();
        assert_eq!(out.output["applied"], false);
        assert_eq!(out.output["ruleResults"][0]["action"]["channel"], "email");
    }

    #[tokio::test]
    async fn reject_action_fails_the_step() {
        let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryKnowledgeStore::new());
        let err = ApplyRules::new(store)
            .execute(input(json!({"ruleId": "limit", "action": {"type": "reject", "message": "over limit"}})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("over limit"));
    }

    #[tokio::test]
    async fn unknown_custom_action_fails() {
        let dispatcher = ExecuteCustomAction::new(BTreeMap::new());
        let err = dispatcher.execute(input(json!({"action": "missing"}))).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
