/// Knowledge graph store
///
/// The graph-mutation API that entity and relationship steps write through:
/// typed entity nodes with JSON properties and typed edges between them.
/// Two backends ship with the crate: an in-memory store used by tests and
/// embedded runs, and a SQLite store for the server.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryKnowledgeStore;
pub use sqlite::SqliteKnowledgeStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity '{0}' not found")]
    NotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A typed entity node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    pub entity_type: String,
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub relationship_type: String,
    pub properties: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_entity(
        &self,
        entity_type: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError>;

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StoreError>;

    /// Merge `properties` into the entity's existing properties.
    async fn update_entity(
        &self,
        id: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError>;

    /// Entities of a type whose properties equal every `filter` field.
    async fn find_entities(
        &self,
        entity_type: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, StoreError>;

    /// Remove an entity and every relationship touching it. `false` if absent.
    async fn delete_entity(&self, id: &str) -> Result<bool, StoreError>;

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
        properties: Map<String, Value>,
    ) -> Result<RelationshipRecord, StoreError>;

    /// Relationships where the entity is either endpoint.
    async fn relationships_of(&self, id: &str) -> Result<Vec<RelationshipRecord>, StoreError>;

    /// Free-text search over string properties, on top of an equality filter.
    async fn search_entities(
        &self,
        entity_type: &str,
        text: &str,
        filter: &Map<String, Value>,
        limit: usize,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let mut found: Vec<EntityRecord> = self
            .find_entities(entity_type, filter)
            .await?
            .into_iter()
            .filter(|record| matches_text(record, text))
            .collect();
        found.truncate(limit);
        Ok(found)
    }
}

pub(crate) fn matches_filter(record: &EntityRecord, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| match key.as_str() {
            "id" => expected.as_str() == Some(record.id.as_str()),
            _ => record.properties.get(key) == Some(expected),
        })
}

pub(crate) fn matches_text(record: &EntityRecord, text: &str) -> bool {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    record.properties.values().any(|value| match value {
        Value::String(s) => s.to_lowercase().contains(&needle),
        Value::Number(n) => n.to_string() == needle,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(props: Value) -> EntityRecord {
        EntityRecord {
            id: "customer-1".into(),
            entity_type: "Customer".into(),
            properties: props.as_object().cloned().unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_id_and_properties() {
        let r = record(json!({"name": "Jane", "tier": "gold"}));
        let filter = json!({"id": "customer-1", "tier": "gold"});
        assert!(matches_filter(&r, filter.as_object().unwrap()));

        let miss = json!({"tier": "silver"});
        assert!(!matches_filter(&r, miss.as_object().unwrap()));
    }

    #[test]
    fn text_search_is_case_insensitive() {
        let r = record(json!({"name": "Jane Doe", "email": "jane@x.com"}));
        assert!(matches_text(&r, "DOE"));
        assert!(matches_text(&r, ""));
        assert!(!matches_text(&r, "bob"));
    }
}
