/// SQLite persistence for execution records

use crate::execution::{ExecutionRecord, ExecutionStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionStorage {
    pool: SqlitePool,
}

impl ExecutionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL,
                inputs TEXT NOT NULL,
                outputs TEXT NOT NULL,
                execution_trace TEXT NOT NULL,
                error_details TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON executions(workflow_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or overwrite the record with the same id.
    pub async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        let error_details = record
            .error_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, session_id, status, inputs, outputs,
                                    execution_trace, error_details, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                outputs = excluded.outputs,
                execution_trace = excluded.execution_trace,
                error_details = excluded.error_details,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(&record.session_id)
        .bind(record.status.to_string())
        .bind(serde_json::to_string(&record.inputs)?)
        .bind(serde_json::to_string(&record.outputs)?)
        .bind(serde_json::to_string(&record.execution_trace)?)
        .bind(error_details)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save execution {}", record.id))?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode(&row)).transpose()
    }

    /// Most recent runs of one workflow first.
    pub async fn list_for_workflow(&self, workflow_id: Uuid, limit: u32) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE workflow_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode).collect()
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
    let uuid = |column: &str| -> Result<Uuid> {
        let raw: String = row.get(column);
        Uuid::parse_str(&raw).with_context(|| format!("{} '{}' is not a UUID", column, raw))
    };
    let time = |column: &str| -> Result<DateTime<Utc>> {
        let raw: String = row.get(column);
        Ok(DateTime::parse_from_rfc3339(&raw)
            .with_context(|| format!("{} '{}' is not RFC3339", column, raw))?
            .with_timezone(&Utc))
    };
    let json = |column: &str| -> Result<serde_json::Value> {
        let raw: String = row.get(column);
        serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", column))
    };

    let status: String = row.get("status");
    let error_details: Option<String> = row.get("error_details");

    Ok(ExecutionRecord {
        id: uuid("id")?,
        workflow_id: uuid("workflow_id")?,
        session_id: row.get("session_id"),
        status: status.parse::<ExecutionStatus>().map_err(|e| anyhow!(e))?,
        inputs: json("inputs")?,
        outputs: serde_json::from_value(json("outputs")?)?,
        execution_trace: serde_json::from_value(json("execution_trace")?)?,
        error_details: error_details
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        created_at: time("created_at")?,
        updated_at: time("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutionState;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> ExecutionStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = ExecutionStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn lifecycle_is_persisted() {
        let storage = storage().await;
        let workflow_id = Uuid::new_v4();
        let mut record = ExecutionRecord::pending(workflow_id, "session-1", json!({"data": {"name": "Jane"}}));
        storage.save(&record).await.unwrap();

        record.mark_running();
        storage.save(&record).await.unwrap();
        record.fail("boom", Some(&ExecutionState::new(json!({}))));
        storage.save(&record).await.unwrap();

        let stored = storage.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.inputs["data"]["name"], "Jane");
        assert_eq!(stored.error_details, Some(json!({"message": "boom"})));

        let runs = storage.list_for_workflow(workflow_id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(storage.get(Uuid::new_v4()).await.unwrap().is_none());
    }
}
