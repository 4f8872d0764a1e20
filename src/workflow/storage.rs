/// SQLite persistence layer for workflow graphs
///
/// Graphs are stored as JSON next to a few indexed lookup columns. `name` is
/// unique: saving a graph whose name already exists updates that row and keeps
/// its id, which is what makes re-planning idempotent. Rows are never deleted,
/// only deactivated.

use crate::workflow::types::WorkflowGraph;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// Whether an upsert inserted a new row or rewrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the workflows table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                definition JSON NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_auto_generated INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_active
            ON workflows(is_active)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a graph keyed by its name.
    ///
    /// An existing row with the same name keeps its id and its activation
    /// flag; the returned graph carries what was actually stored. Use
    /// `set_active` to change activation.
    pub async fn upsert_by_name(&self, mut graph: WorkflowGraph) -> Result<(WorkflowGraph, SaveOutcome)> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, bool)> =
            sqlx::query("SELECT id, is_active FROM workflows WHERE name = ?")
                .bind(&graph.name)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| (row.get("id"), row.get("is_active")));

        let outcome = match existing {
            Some((id, is_active)) => {
                graph.id = Uuid::parse_str(&id)
                    .with_context(|| format!("stored workflow id '{}' is not a UUID", id))?;
                graph.is_active = is_active;
                sqlx::query(
                    r#"
                    UPDATE workflows
                    SET definition = ?, is_auto_generated = ?,
                        updated_at = CURRENT_TIMESTAMP
                    WHERE id = ?
                    "#,
                )
                .bind(serde_json::to_string(&graph)?)
                .bind(graph.is_auto_generated)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                SaveOutcome::Updated
            }
            None => {
                // A renamed graph keeps its row.
                let result = sqlx::query(
                    r#"
                    INSERT INTO workflows (id, name, definition, is_active, is_auto_generated, updated_at)
                    VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        definition = excluded.definition,
                        is_active = excluded.is_active,
                        is_auto_generated = excluded.is_auto_generated,
                        updated_at = CURRENT_TIMESTAMP
                    "#,
                )
                .bind(graph.id.to_string())
                .bind(&graph.name)
                .bind(serde_json::to_string(&graph)?)
                .bind(graph.is_active)
                .bind(graph.is_auto_generated)
                .execute(&mut *tx)
                .await?;
                tracing::debug!("💾 Inserted workflow '{}' ({} row)", graph.name, result.rows_affected());
                SaveOutcome::Created
            }
        };

        tx.commit().await?;
        Ok((graph, outcome))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<WorkflowGraph>> {
        let row = sqlx::query("SELECT definition, is_active FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode(&row)).transpose()
    }

    /// Metadata of every stored graph, most recently updated first.
    pub async fn list(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, json_extract(definition, '$.displayName') AS display_name,
                   is_active, is_auto_generated,
                   CAST(created_at AS TEXT) AS created_at, CAST(updated_at AS TEXT) AS updated_at
            FROM workflows ORDER BY updated_at DESC, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                display_name: row.get::<Option<String>, _>("display_name").unwrap_or_default(),
                is_active: row.get("is_active"),
                is_auto_generated: row.get("is_auto_generated"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Every active graph, keyed by id, for catalog loading.
    pub async fn load_active(&self) -> Result<HashMap<Uuid, WorkflowGraph>> {
        let rows = sqlx::query("SELECT definition, is_active FROM workflows WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await?;

        let mut graphs = HashMap::new();
        for row in rows {
            let graph = decode(&row)?;
            graphs.insert(graph.id, graph);
        }
        Ok(graphs)
    }

    /// Soft-delete. Returns false when no such graph exists.
    /// Soft delete. Returns false when no such row exists.
    pub async fn deactivate(&self, id: Uuid) -> Result<bool> {
        self.set_active(id, false).await
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET is_active = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(active)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// The `is_active` column is authoritative over the stored JSON.
fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowGraph> {
    let definition: String = row.get("definition");
    let mut graph: WorkflowGraph =
        serde_json::from_str(&definition).context("stored workflow definition is not valid JSON")?;
    graph.is_active = row.get("is_active");
    Ok(graph)
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_auto_generated: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::StepSpec;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> WorkflowStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn graph(name: &str) -> WorkflowGraph {
        WorkflowGraph::sequential(name, vec![StepSpec::validation("validate-input", "check")])
    }

    #[tokio::test]
    async fn upsert_keeps_the_first_id() {
        let storage = storage().await;
        let (first, outcome) = storage.upsert_by_name(graph("create-customer")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Created);

        let mut again = graph("create-customer");
        again.description = "regenerated".into();
        let (second, outcome) = storage.upsert_by_name(again).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);
        assert_eq!(second.id, first.id);

        let stored = storage.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.description, "regenerated");
        assert_eq!(storage.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deactivated_graphs_are_not_loaded() {
        let storage = storage().await;
        let (kept, _) = storage.upsert_by_name(graph("read-customer")).await.unwrap();
        let (gone, _) = storage.upsert_by_name(graph("delete-customer")).await.unwrap();

        assert!(storage.deactivate(gone.id).await.unwrap());
        assert!(!storage.deactivate(Uuid::new_v4()).await.unwrap());

        let active = storage.load_active().await.unwrap();
        assert!(active.contains_key(&kept.id));
        assert!(!active.contains_key(&gone.id));

        let stored = storage.get(gone.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn upsert_does_not_reactivate_a_deactivated_row() {
        let storage = storage().await;
        let (first, _) = storage.upsert_by_name(graph("delete-customer")).await.unwrap();
        assert!(storage.deactivate(first.id).await.unwrap());

        let (again, outcome) = storage.upsert_by_name(graph("delete-customer")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);
        assert!(!again.is_active);
        assert!(!storage.get(first.id).await.unwrap().unwrap().is_active);
        assert!(storage.load_active().await.unwrap().is_empty());

        assert!(storage.set_active(first.id, true).await.unwrap());
        assert!(storage.load_active().await.unwrap().contains_key(&first.id));
    }
}
