//! Operation registry port.
//!
//! A keyed store mapping an execution identifier to its latest run snapshot.
//! The engine is the only writer of a given run; status-polling callers read
//! copies. The infrastructure layer (provisio-infra) provides an in-memory
//! implementation with retention/capacity eviction and a SQLite one.

use provisio_types::error::RepositoryError;
use provisio_types::workflow::WorkflowExecution;
use uuid::Uuid;

/// Storage interface for run snapshots.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionStore: Send + Sync {
    /// Fetch the latest snapshot of a run.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>>
    + Send;

    /// Insert or replace the snapshot of a run.
    fn put(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove a run. Returns `true` if it existed.
    fn delete(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// List runs newest first, optionally filtered by definition.
    fn list(
        &self,
        definition_id: Option<&str>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;
}
