/// SQLite-backed knowledge store
///
/// Entities live in `kg_nodes` and relationships in `kg_edges`, with
/// properties stored as JSON text. Filtering happens in Rust after a
/// label-scoped query, which keeps the schema free of per-type columns.

use crate::knowledge::{matches_filter, EntityRecord, KnowledgeStore, RelationshipRecord, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the node/edge tables. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kg_nodes (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                properties TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kg_nodes_label ON kg_nodes(label)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kg_edges (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                properties TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kg_edges_source ON kg_edges(source_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kg_edges_target ON kg_edges(target_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

fn parse_properties(raw: &str) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Corrupt(format!("properties are not an object: {}", other))),
    }
}

fn entity_from_row(row: &SqliteRow) -> Result<EntityRecord, StoreError> {
    Ok(EntityRecord {
        id: row.try_get("id")?,
        entity_type: row.try_get("label")?,
        properties: parse_properties(&row.try_get::<String, _>("properties")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn relationship_from_row(row: &SqliteRow) -> Result<RelationshipRecord, StoreError> {
    Ok(RelationshipRecord {
        id: row.try_get("id")?,
        from_id: row.try_get("source_id")?,
        to_id: row.try_get("target_id")?,
        relationship_type: row.try_get("rel_type")?,
        properties: parse_properties(&row.try_get::<String, _>("properties")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn create_entity(
        &self,
        entity_type: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::new_v4().to_string(),
            entity_type: entity_type.to_string(),
            properties,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO kg_nodes (id, label, properties, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.entity_type)
        .bind(serde_json::to_string(&record.properties)?)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM kg_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    async fn update_entity(
        &self,
        id: &str,
        properties: Map<String, Value>,
    ) -> Result<EntityRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM kg_nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut record = entity_from_row(&row)?;
        record.properties.extend(properties);
        record.updated_at = Utc::now();

        sqlx::query("UPDATE kg_nodes SET properties = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&record.properties)?)
            .bind(record.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_entities(
        &self,
        entity_type: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<EntityRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM kg_nodes WHERE label = ? ORDER BY created_at, rowid")
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await?;

        let mut found = Vec::new();
        for row in &rows {
            let record = entity_from_row(row)?;
            if matches_filter(&record, filter) {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn delete_entity(&self, id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kg_edges WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM kg_nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relationship_type: &str,
        properties: Map<String, Value>,
    ) -> Result<RelationshipRecord, StoreError> {
        for id in [from_id, to_id] {
            if self.get_entity(id).await?.is_none() {
                return Err(StoreError::NotFound(id.to_string()));
            }
        }

        let record = RelationshipRecord {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            relationship_type: relationship_type.to_string(),
            properties,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO kg_edges (id, source_id, target_id, rel_type, properties, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.from_id)
        .bind(&record.to_id)
        .bind(&record.relationship_type)
        .bind(serde_json::to_string(&record.properties)?)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn relationships_of(&self, id: &str) -> Result<Vec<RelationshipRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM kg_edges WHERE source_id = ? OR target_id = ? ORDER BY created_at, rowid",
        )
        .bind(id)
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(relationship_from_row).collect()
    }
}
