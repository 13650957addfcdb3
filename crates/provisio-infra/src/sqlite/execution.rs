//! SQLite operation registry.
//!
//! Implements `ExecutionStore` from `provisio-core` using sqlx with split
//! read/write pools. Each run is stored as one JSON snapshot plus the columns
//! used for filtering, so `status` works across process restarts.

use chrono::{DateTime, SecondsFormat, Utc};
use provisio_core::repository::execution::ExecutionStore;
use provisio_types::error::RepositoryError;
use provisio_types::workflow::WorkflowExecution;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionStore`.
pub struct SqliteExecutionStore {
    pool: DatabasePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete terminal runs completed before `cutoff`. Returns the number removed.
    pub async fn purge_finished_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM workflow_executions WHERE completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let snapshot: String = row
        .try_get("snapshot")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&snapshot)
        .map_err(|e| RepositoryError::Serialization(format!("invalid run snapshot JSON: {e}")))
}

fn status_column(execution: &WorkflowExecution) -> Result<String, RepositoryError> {
    match serde_json::to_value(execution.status) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(RepositoryError::Serialization(format!(
            "unexpected status encoding: {other}"
        ))),
        Err(e) => Err(RepositoryError::Serialization(e.to_string())),
    }
}

/// Fixed-width RFC 3339 so text comparison matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// ExecutionStore impl
// ---------------------------------------------------------------------------

impl ExecutionStore for SqliteExecutionStore {
    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT snapshot FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_snapshot).transpose()
    }

    async fn put(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(execution)
            .map_err(|e| RepositoryError::Serialization(format!("serialize run snapshot: {e}")))?;
        let status = status_column(execution)?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
                 (id, definition_id, status, started_at, completed_at, snapshot, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 completed_at = excluded.completed_at,
                 snapshot = excluded.snapshot,
                 updated_at = excluded.updated_at"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.definition_id)
        .bind(&status)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(&snapshot)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        definition_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match definition_id {
            Some(def) => {
                sqlx::query(
                    "SELECT snapshot FROM workflow_executions \
                     WHERE definition_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(def)
                .bind(limit)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT snapshot FROM workflow_executions ORDER BY id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_snapshot).collect()
    }
}
