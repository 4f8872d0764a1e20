/// Entity and relationship operations over the knowledge store

use crate::error::StepError;
use crate::knowledge::{EntityRecord, KnowledgeStore};
use crate::steps::{object_param, Step, StepInput, StepOutcome};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn entity_json(record: &EntityRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

/// Id param that may arrive as a string or a number.
fn id_param(input: &StepInput, name: &str) -> Result<String, StepError> {
    match input.param(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StepError::invalid(format!("missing id parameter '{}'", name))),
    }
}

macro_rules! store_step {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name {
            store: Arc<dyn KnowledgeStore>,
        }

        impl $name {
            pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
                Self { store }
            }
        }
    };
}

store_step!(
    /// `create-entity`: `{entityType, entityData}` -> `{entityId, entityType, entityData}`
    CreateEntity
);
store_step!(
    /// `update-entity`: merges `updateData` into entity `id`
    UpdateEntity
);
store_step!(
    /// `find-entities`: by `id`, or by an equality `query` over a type
    FindEntities
);
store_step!(
    /// `delete-entity`: detach-deletes entity `id`
    DeleteEntity
);
store_step!(
    /// `create-relationship`: typed edge between two entities, with an
    /// optional property patch applied to the target entity before the
    /// edge is written. Not atomic: a store failure on the edge keeps the patch.
    CreateRelationship
);
store_step!(
    /// `update-knowledge-graph`: merges `nodeData` into node `nodeId`
    UpdateKnowledgeGraph
);
store_step!(
    /// `check-dependencies`: refuses while relationships still point at the entity
    CheckDependencies
);

#[async_trait]
impl Step for CreateEntity {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let entity_type = input.require_str("entityType")?.to_string();
        let data = object_param(&input, "entityData")?;

        let record = self.store.create_entity(&entity_type, data).await?;
        tracing::debug!("🆕 Created {} {}", record.entity_type, record.id);

        Ok(StepOutcome::completed(json!({
            "entityId": record.id,
            "entityType": record.entity_type,
            "entityData": record.properties,
        }))
        .with_context("lastCreatedEntityId", Value::String(record.id.clone())))
    }
}

#[async_trait]
impl Step for UpdateEntity {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let id = id_param(&input, "id")?;
        let patch = object_param(&input, "updateData")?;
        let fields: Vec<String> = patch.keys().cloned().collect();

        let record = self.store.update_entity(&id, patch).await.map_err(|e| match e {
            crate::knowledge::StoreError::NotFound(id) => StepError::NotFound(id),
            other => other.into(),
        })?;

        Ok(StepOutcome::completed(json!({
            "entityId": record.id,
            "updatedFields": fields,
            "entity": entity_json(&record),
        })))
    }
}

#[async_trait]
impl Step for FindEntities {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let entity_type = input.require_str("entityType")?.to_string();

        if input.param("id").is_some() {
            let id = id_param(&input, "id")?;
            let record = self
                .store
                .get_entity(&id)
                .await?
                .filter(|r| r.entity_type == entity_type)
                .ok_or_else(|| StepError::NotFound(format!("{} '{}'", entity_type, id)))?;

            return Ok(StepOutcome::completed(json!({
                "entityId": record.id,
                "entity": entity_json(&record),
                "results": [entity_json(&record)],
                "count": 1,
            })));
        }

        let filter = object_param(&input, "query")?;
        let results = self.store.find_entities(&entity_type, &filter).await?;
        Ok(StepOutcome::completed(json!({
            "results": results.iter().map(entity_json).collect::<Vec<_>>(),
            "count": results.len(),
        })))
    }
}

#[async_trait]
impl Step for DeleteEntity {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let id = id_param(&input, "id")?;
        if !self.store.delete_entity(&id).await? {
            return Err(StepError::NotFound(id));
        }
        tracing::debug!("🗑️ Deleted entity {}", id);
        Ok(StepOutcome::completed(json!({ "entityId": id, "deleted": true })))
    }
}

#[async_trait]
impl Step for CreateRelationship {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let from = id_param(&input, "fromEntityId")?;
        let to = id_param(&input, "toEntityId")?;
        let relationship_type = input.require_str("relationshipType")?.to_string();
        let properties = object_param(&input, "properties")?;
        let patch = object_param(&input, "toEntityPatch")?;

        // Patch first: a missing target must not leave an edge behind.
        let patched: Vec<String> = patch.keys().cloned().collect();
        if !patch.is_empty() {
            self.store.update_entity(&to, patch).await?;
        }

        let record = self
            .store
            .create_relationship(&from, &to, &relationship_type, properties)
            .await?;

        Ok(StepOutcome::completed(json!({
            "relationshipId": record.id,
            "fromEntityId": record.from_id,
            "toEntityId": record.to_id,
            "relationshipType": record.relationship_type,
            "patchedFields": patched,
        })))
    }
}

#[async_trait]
impl Step for UpdateKnowledgeGraph {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let node_id = id_param(&input, "nodeId")?;
        let data = object_param(&input, "nodeData")?;
        let record = self.store.update_entity(&node_id, data).await?;

        Ok(StepOutcome::completed(json!({
            "nodeId": record.id,
            "properties": record.properties,
        })))
    }
}

#[async_trait]
impl Step for CheckDependencies {
    async fn execute(&self, input: StepInput) -> Result<StepOutcome, StepError> {
        let id = id_param(&input, "id")?;
        let force = input.param("force").and_then(Value::as_bool).unwrap_or(false);

        let dependants = self
            .store
            .relationships_of(&id)
            .await?
            .into_iter()
            .filter(|r| r.to_id == id)
            .count();

        if dependants > 0 && !force {
            return Err(StepError::HasDependencies { id, count: dependants });
        }

        Ok(StepOutcome::completed(json!({
            "entityId": id,
            "dependencies": dependants,
            "forced": force && dependants > 0,
        })))
    }
}
