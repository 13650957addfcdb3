//! Runtime selection of the operation registry backend.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use provisio_core::repository::execution::ExecutionStore;
use provisio_types::config::{RegistryConfig, StoreBackend};
use provisio_types::error::RepositoryError;
use provisio_types::workflow::WorkflowExecution;
use uuid::Uuid;

use crate::memory::InMemoryExecutionStore;
use crate::sqlite::pool::{DatabasePool, database_url};
use crate::sqlite::SqliteExecutionStore;

/// An `ExecutionStore` chosen from configuration.
pub enum AnyExecutionStore {
    Memory(InMemoryExecutionStore),
    Sqlite(SqliteExecutionStore),
}

impl AnyExecutionStore {
    /// Open the configured backend inside `data_dir`.
    ///
    /// The SQLite backend purges terminal runs older than the retention
    /// window on open; the in-memory one evicts as runs finish.
    pub async fn open(config: &RegistryConfig, data_dir: &Path) -> Result<Self, sqlx::Error> {
        match config.backend {
            StoreBackend::Memory => Ok(Self::Memory(InMemoryExecutionStore::from_config(config))),
            StoreBackend::Sqlite => {
                let pool = DatabasePool::new(&database_url(data_dir)).await?;
                let store = SqliteExecutionStore::new(pool);
                match retention_cutoff(Utc::now(), config.retention_secs) {
                    Some(cutoff) => match store.purge_finished_before(cutoff).await {
                        Ok(0) => {}
                        Ok(purged) => tracing::info!(purged, "purged expired runs"),
                        Err(e) => tracing::warn!(error = %e, "failed to purge expired runs"),
                    },
                    None => tracing::debug!(
                        retention_secs = config.retention_secs,
                        "retention window reaches past the earliest timestamp, nothing to purge"
                    ),
                }
                Ok(Self::Sqlite(store))
            }
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Memory(_) => StoreBackend::Memory,
            Self::Sqlite(_) => StoreBackend::Sqlite,
        }
    }
}

/// Oldest completion time a terminal run may have and still be kept.
/// `None` when the window is too large to represent.
fn retention_cutoff(now: DateTime<Utc>, retention_secs: u64) -> Option<DateTime<Utc>> {
    let window = TimeDelta::try_seconds(i64::try_from(retention_secs).ok()?)?;
    now.checked_sub_signed(window)
}

impl ExecutionStore for AnyExecutionStore {
    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        match self {
            Self::Memory(s) => s.get(id).await,
            Self::Sqlite(s) => s.get(id).await,
        }
    }

    async fn put(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        match self {
            Self::Memory(s) => s.put(execution).await,
            Self::Sqlite(s) => s.put(execution).await,
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        match self {
            Self::Memory(s) => s.delete(id).await,
            Self::Sqlite(s) => s.delete(id).await,
        }
    }

    async fn list(
        &self,
        definition_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        match self {
            Self::Memory(s) => s.list(definition_id, limit).await,
            Self::Sqlite(s) => s.list(definition_id, limit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_cutoff() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 3600), Some(now - TimeDelta::hours(1)));
        assert_eq!(retention_cutoff(now, 0), Some(now));
        assert_eq!(retention_cutoff(now, u64::MAX), None);
        assert_eq!(retention_cutoff(now, i64::MAX as u64), None);
    }

    #[tokio::test]
    async fn test_open_sqlite_with_unbounded_retention() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            retention_secs: u64::MAX,
            ..RegistryConfig::default()
        };
        let store = AnyExecutionStore::open(&config, dir.path()).await.unwrap();
        assert_eq!(store.backend(), StoreBackend::Sqlite);
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            backend: StoreBackend::Memory,
            ..RegistryConfig::default()
        };
        let store = AnyExecutionStore::open(&config, dir.path()).await.unwrap();
        assert_eq!(store.backend(), StoreBackend::Memory);
        assert!(store.list(None, 10).await.unwrap().is_empty());
        assert!(!dir.path().join("provisio.db").exists());
    }

    #[tokio::test]
    async fn test_open_sqlite_backend_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnyExecutionStore::open(&RegistryConfig::default(), dir.path())
            .await
            .unwrap();
        assert_eq!(store.backend(), StoreBackend::Sqlite);
        assert!(dir.path().join("provisio.db").exists());
        assert!(store.get(&Uuid::now_v7()).await.unwrap().is_none());
    }
}
