//! Workflow service: definition registry, run creation, status queries.
//!
//! Definitions are validated once, at registration. Runs are created against
//! a registered definition and driven by the `WorkflowEngine`; their snapshots
//! live in the engine's `ExecutionStore`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use provisio_types::error::RepositoryError;
use provisio_types::workflow::{WorkflowDefinition, WorkflowExecution};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::execution::ExecutionStore;
use crate::workflow::definition::validate_definition;
use crate::workflow::executor::{ExecutorError, WorkflowEngine};

/// Errors returned by the workflow service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("definition rejected: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("workflow definition not found: {0}")]
    UnknownDefinition(String),

    #[error("execution not found: {0}")]
    UnknownOperation(Uuid),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Facade over the definition registry and the execution engine.
pub struct WorkflowService<S: ExecutionStore> {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    engine: WorkflowEngine<S>,
}

impl<S: ExecutionStore + 'static> WorkflowService<S> {
    pub fn new(engine: WorkflowEngine<S>) -> Self {
        Self {
            definitions: DashMap::new(),
            engine,
        }
    }

    pub fn engine(&self) -> &WorkflowEngine<S> {
        &self.engine
    }

    /// Validate and register a definition, replacing one with the same ID.
    ///
    /// Runs already started keep the definition they were created from.
    pub fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, ServiceError> {
        let violations = validate_definition(&definition);
        if !violations.is_empty() {
            tracing::warn!(
                workflow = definition.id.as_str(),
                violations = violations.len(),
                "workflow definition rejected"
            );
            return Err(ServiceError::Validation(violations));
        }

        let definition = Arc::new(definition);
        let replaced = self
            .definitions
            .insert(definition.id.clone(), Arc::clone(&definition))
            .is_some();
        tracing::info!(
            workflow = definition.id.as_str(),
            version = definition.version.as_str(),
            replaced,
            "workflow definition registered"
        );
        Ok(definition)
    }

    pub fn get_definition(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(id).map(|d| Arc::clone(d.value()))
    }

    /// Registered definitions, sorted by ID.
    pub fn list_definitions(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut defs: Vec<_> = self
            .definitions
            .iter()
            .map(|d| Arc::clone(d.value()))
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn remove_definition(&self, id: &str) -> bool {
        self.definitions.remove(id).is_some()
    }

    /// Start a run in the background and return its execution ID.
    pub async fn start_run(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<Uuid, ServiceError> {
        let definition = self.require_definition(definition_id)?;
        Ok(self.engine.start(definition, variables).await?)
    }

    /// Start a run and wait for its terminal snapshot.
    pub async fn run_to_completion(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<WorkflowExecution, ServiceError> {
        let definition = self.require_definition(definition_id)?;
        Ok(self.engine.execute(definition, variables).await?)
    }

    /// Current snapshot of a run.
    pub async fn get_status(&self, run_id: Uuid) -> Result<WorkflowExecution, ServiceError> {
        self.engine
            .store()
            .get(&run_id)
            .await?
            .ok_or(ServiceError::UnknownOperation(run_id))
    }

    pub async fn list_runs(
        &self,
        definition_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, ServiceError> {
        Ok(self.engine.store().list(definition_id, limit).await?)
    }

    /// Request cancellation of a run.
    ///
    /// Returns `false` when the run already reached a terminal state.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<bool, ServiceError> {
        let run = self.get_status(run_id).await?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        Ok(self.engine.cancel(run_id))
    }

    fn require_definition(&self, id: &str) -> Result<Arc<WorkflowDefinition>, ServiceError> {
        self.get_definition(id)
            .ok_or_else(|| ServiceError::UnknownDefinition(id.to_string()))
    }
}
