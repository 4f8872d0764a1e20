/// In-memory knowledge store
///
/// Deterministic ids (`<type>-<n>`) make it the store of choice for tests
/// and for single-process runs where persistence is not wanted.

use crate::knowledge::{matches_filter, EntityRecord, KnowledgeStore, RelationshipRecord, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    state: RwLock<GraphState>,
}

#[derive(Debug, Default)]
struct GraphState {
    entities: Vec<EntityRecord>,
    relationships: Vec<RelationshipRecord>,
    counters: HashMap<String, u64>,
    relationship_seq: u64,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entity_count(&self) -> usize {
        self.state.read().await.entities.len()
    }

    pub async fn relationship_count(&self) -> usize {
        self.state.read().await.relationships.len()
    }
}

fn id_prefix(entity_type: &str) -> String {
    entity_type
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn create_entity(
        &self,
        entity_type: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        let mut state = self.state.write().await;
        let prefix = id_prefix(entity_type);
        let counter = state.counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;

        let now = Utc::now();
        let record = EntityRecord {
            id: format!("{}-{}", prefix, counter),
            entity_type: entity_type.to_string(),
            properties,
            created_at: now,
            updated_at: now,
        };
        state.entities.push(record.clone());
        Ok(record)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.entities.iter().find(|e| e.id == id).cloned())
    }

    async fn update_entity(
        &self,
        id: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        let mut state = self.state.write().await;
        let record = state
            .entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.properties.extend(properties);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn find_entities(
        &self,
        entity_type: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type && matches_filter(e, filter))
            .cloned()
            .collect())
    }

    async fn delete_entity(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.entities.len();
        state.entities.retain(|e| e.id != id);
        if state.entities.len() == before {
            return Ok(false);
        }
        state.relationships.retain(|r| r.from_id != id && r.to_id != id);
        Ok(true)
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
        properties: Map<String, Value>,
    ) -> Result<RelationshipRecord, StoreError> {
        let mut state = self.state.write().await;
        for id in [from_id, to_id] {
            if !state.entities.iter().any(|e| e.id == id) {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        state.relationship_seq += 1;
        let record = RelationshipRecord {
            id: format!("rel-{}", state.relationship_seq),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            relationship_type: relationship_type.to_string(),
            properties,
            created_at: Utc::now(),
        };
        state.relationships.push(record.clone());
        Ok(record)
    }

    async fn relationships_of(&self, id: &str) -> Result<Vec<RelationshipRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .relationships
            .iter()
            .filter(|r| r.from_id == id || r.to_id == id)
            .cloned()
            .collect())
    }
}
