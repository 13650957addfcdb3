//! In-memory operation registry.
//!
//! Snapshots live in a `DashMap` keyed by execution ID, so status pollers
//! never contend with each other and each run's writer only locks its own
//! shard. Terminal runs are evicted once they are older than the retention
//! window, and the oldest terminal runs go first when the store is over
//! capacity. Runs that have not finished are never evicted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use provisio_core::repository::execution::ExecutionStore;
use provisio_types::config::RegistryConfig;
use provisio_types::error::RepositoryError;
use provisio_types::workflow::WorkflowExecution;
use uuid::Uuid;

/// DashMap-backed `ExecutionStore` with retention and capacity eviction.
pub struct InMemoryExecutionStore {
    runs: DashMap<Uuid, WorkflowExecution>,
    retention: Duration,
    capacity: usize,
}

impl InMemoryExecutionStore {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            runs: DashMap::new(),
            retention,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(Duration::from_secs(config.retention_secs), config.capacity)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Apply the eviction policy relative to `now`. Returns the evicted count.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let before = self.runs.len();

        self.runs.retain(|_, run| match finished_at(run) {
            Some(done) => now.signed_duration_since(done) < retention,
            None => true,
        });

        let over = self.runs.len().saturating_sub(self.capacity);
        if over > 0 {
            let mut terminal: Vec<(DateTime<Utc>, Uuid)> = self
                .runs
                .iter()
                .filter_map(|entry| finished_at(entry.value()).map(|t| (t, *entry.key())))
                .collect();
            terminal.sort_unstable();
            for (_, id) in terminal.into_iter().take(over) {
                self.runs.remove(&id);
            }
        }

        let evicted = before - self.runs.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.runs.len(), "evicted finished runs");
        }
        evicted
    }
}

fn finished_at(run: &WorkflowExecution) -> Option<DateTime<Utc>> {
    if run.status.is_terminal() {
        Some(run.completed_at.unwrap_or(run.started_at))
    } else {
        None
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn get(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.runs.get(id).map(|r| r.value().clone()))
    }

    async fn put(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let terminal = execution.status.is_terminal();
        self.runs.insert(execution.id, execution.clone());
        if terminal {
            self.evict(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.runs.remove(id).is_some())
    }

    async fn list(
        &self,
        definition_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut runs: Vec<WorkflowExecution> = self
            .runs
            .iter()
            .filter(|r| definition_id.is_none_or(|d| r.definition_id == d))
            .map(|r| r.value().clone())
            .collect();
        // UUIDv7 sorts by creation time.
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use provisio_types::workflow::{ExecutionStatus, WorkflowDefinition};

    fn definition(id: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            phases: vec!["setup".to_string()],
            steps: vec![],
            parallel_groups: vec![],
            rollback_steps: vec![],
            metadata: HashMap::new(),
        }
    }

    fn run(def: &str, status: ExecutionStatus, age_secs: i64) -> WorkflowExecution {
        let mut exec = WorkflowExecution::new(Uuid::now_v7(), &definition(def), HashMap::new());
        exec.status = status;
        let at = Utc::now() - chrono::Duration::seconds(age_secs);
        exec.started_at = at;
        if status.is_terminal() {
            exec.completed_at = Some(at);
        }
        exec
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryExecutionStore::default();
        let exec = run("bootstrap", ExecutionStatus::Running, 0);

        store.put(&exec).await.unwrap();
        assert_eq!(store.get(&exec.id).await.unwrap(), Some(exec.clone()));

        assert!(store.delete(&exec.id).await.unwrap());
        assert!(!store.delete(&exec.id).await.unwrap());
        assert!(store.get(&exec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_evicts_only_finished_runs() {
        let store = InMemoryExecutionStore::new(Duration::from_secs(60), 100);
        let old_done = run("bootstrap", ExecutionStatus::Completed, 600);
        let old_running = run("bootstrap", ExecutionStatus::Running, 600);
        let fresh_done = run("bootstrap", ExecutionStatus::Failed, 1);

        store.put(&old_running).await.unwrap();
        store.put(&old_done).await.unwrap();
        store.put(&fresh_done).await.unwrap();

        assert!(store.get(&old_done.id).await.unwrap().is_none());
        assert!(store.get(&old_running.id).await.unwrap().is_some());
        assert!(store.get(&fresh_done.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_finished_first() {
        let store = InMemoryExecutionStore::new(Duration::from_secs(3_600), 2);
        let pending = run("bootstrap", ExecutionStatus::Pending, 0);
        let oldest = run("bootstrap", ExecutionStatus::Completed, 30);
        let newer = run("bootstrap", ExecutionStatus::Cancelled, 10);

        store.put(&pending).await.unwrap();
        store.put(&oldest).await.unwrap();
        store.put(&newer).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get(&oldest.id).await.unwrap().is_none());
        assert!(store.get(&pending.id).await.unwrap().is_some());
        assert!(store.get(&newer.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let store = InMemoryExecutionStore::default();
        let a = run("bootstrap", ExecutionStatus::Completed, 0);
        let b = run("teardown", ExecutionStatus::Running, 0);
        let c = run("bootstrap", ExecutionStatus::Running, 0);
        for exec in [&a, &b, &c] {
            store.put(exec).await.unwrap();
        }

        let all = store.list(None, 10).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![c.id, b.id, a.id]
        );

        let bootstrap = store.list(Some("bootstrap"), 1).await.unwrap();
        assert_eq!(bootstrap.len(), 1);
        assert_eq!(bootstrap[0].id, c.id);
    }
}
