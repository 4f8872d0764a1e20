//! Shared test doubles for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use ontoflow::error::StepError;
use ontoflow::knowledge::{EntityRecord, KnowledgeStore, RelationshipRecord, StoreError};
use ontoflow::ontology::{
    EntityDefinition, Ontology, PropertyDefinition, PropertyType, RelationDefinition, RelationType,
    RuleDefinition, RuleScope, RuleType,
};
use ontoflow::steps::{Step, StepInput, StepOutcome};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One observed step call.
#[derive(Debug, Clone)]
pub struct Call {
    pub step_id: String,
    pub params: Value,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn called_steps(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|c| c.step_id.clone()).collect()
}

/// Records every call, optionally sleeps, and echoes its params back.
pub struct RecordingStep {
    log: CallLog,
    delay: Duration,
    extra: Value,
}

impl RecordingStep {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            delay: Duration::ZERO,
            extra: Value::Null,
        }
    }

    pub fn delayed(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    /// Fields merged into every output.
    pub fn returning(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

#[async_trait]
impl Step for RecordingStep {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.lock().unwrap().push(Call {
            step_id: input.step_id.clone(),
            params: input.params.clone(),
        });

        let mut output = json!({ "params": input.params });
        if let (Value::Object(out), Value::Object(extra)) = (&mut output, &self.extra) {
            out.extend(extra.clone());
        }
        Ok(StepOutcome::completed(output))
    }
}

/// Always fails with the given message.
pub struct FailingStep(pub &'static str);

#[async_trait]
impl Step for FailingStep {
    async fn execute(&self, _input: StepInput) -> Result<StepOutcome, StepError> {
        Err(StepError::Failed(self.0.to_string()))
    }
}

/// Knowledge store that hands out a fixed id for every created entity and
/// accepts any update to it.
pub struct EchoStore {
    pub id: &'static str,
    pub created: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl EchoStore {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            created: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, entity_type: &str, properties: Map<String, Value>) -> EntityRecord {
        let now = Utc::now();
        EntityRecord {
            id: self.id.to_string(),
            entity_type: entity_type.to_string(),
            properties,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl KnowledgeStore for EchoStore {
    async fn create_entity(
        &self,
        entity_type: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        self.created
            .lock()
            .unwrap()
            .push((entity_type.to_string(), properties.clone()));
        Ok(self.record(entity_type, properties))
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StoreError> {
        Ok((id == self.id).then(|| self.record("Customer", Map::new())))
    }

    async fn update_entity(
        &self,
        id: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        if id != self.id {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.record("Customer", properties))
    }

    async fn find_entities(
        &self,
        _entity_type: &str,
        _filter: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool, StoreError> {
        Ok(id == self.id)
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
        properties: Map<String, Value>,
    ) -> Result<RelationshipRecord, StoreError> {
        Ok(RelationshipRecord {
            id: "rel-echo".to_string(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            relationship_type: relationship_type.to_string(),
            properties,
            created_at: Utc::now(),
        })
    }

    async fn relationships_of(&self, _id: &str) -> Result<Vec<RelationshipRecord>, StoreError> {
        Ok(Vec::new())
    }
}

pub fn property(name: &str, property_type: PropertyType, required: bool) -> PropertyDefinition {
    PropertyDefinition {
        name: name.to_string(),
        display_name: None,
        property_type,
        required,
        unique: false,
        enum_values: Vec::new(),
        default_value: None,
        is_active: true,
    }
}

pub fn entity(id: &str, name: &str, properties: Vec<PropertyDefinition>) -> EntityDefinition {
    EntityDefinition {
        id: id.to_string(),
        name: name.to_string(),
        display_name: None,
        description: None,
        properties,
        is_active: true,
    }
}

pub fn customer() -> EntityDefinition {
    entity(
        "ent-customer",
        "Customer",
        vec![
            property("name", PropertyType::String, true),
            property("email", PropertyType::String, true),
        ],
    )
}

pub fn order() -> EntityDefinition {
    entity(
        "ent-order",
        "Order",
        vec![
            property("total", PropertyType::Number, true),
            property("customerId", PropertyType::Reference, false),
        ],
    )
}

pub fn has_orders() -> RelationDefinition {
    RelationDefinition {
        id: "rel-has-orders".to_string(),
        name: "has_orders".to_string(),
        display_name: None,
        relation_type: RelationType::OneToMany,
        from_cardinality: None,
        to_cardinality: None,
        from_entity_id: "ent-customer".to_string(),
        to_entity_id: "ent-order".to_string(),
        is_active: true,
    }
}

pub fn vip_rule() -> RuleDefinition {
    RuleDefinition {
        id: "rule-vip".to_string(),
        name: "mark-vip".to_string(),
        display_name: Some("Mark VIP".to_string()),
        rule_type: RuleType::BusinessLogic,
        scope: RuleScope::Entity,
        entity_id: Some("ent-customer".to_string()),
        relation_id: None,
        condition: json!({"field": "inputs.total", "operator": ">=", "value": 1000}),
        action: json!({"set": {"tier": "vip"}}),
        expression: None,
        is_active: true,
    }
}

/// Customer, Order, `has_orders` and one entity rule.
pub fn shop_ontology() -> Ontology {
    Ontology {
        entities: vec![customer(), order()],
        relations: vec![has_orders()],
        rules: vec![vip_rule()],
    }
}
