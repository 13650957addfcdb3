//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! `WorkflowService` is generic over its execution store, but AppState pins
//! it to the configured infra backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use provisio_core::service::WorkflowService;
use provisio_core::workflow::action::ActionRegistry;
use provisio_core::workflow::definition::discover_workflows;
use provisio_core::workflow::executor::WorkflowEngine;
use provisio_infra::action::register_builtin_actions;
use provisio_infra::config::{load_global_config, resolve_data_dir};
use provisio_infra::store::AnyExecutionStore;
use provisio_types::config::{GlobalConfig, StoreBackend};

/// Concrete workflow service pinned to the infra store.
pub type ConcreteWorkflowService = WorkflowService<AnyExecutionStore>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub workflow_service: Arc<ConcreteWorkflowService>,
    pub config: Arc<GlobalConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, open the store, wire services.
    ///
    /// `backend` overrides the configured registry backend (the CLI always
    /// uses SQLite so `status` can read runs from earlier invocations).
    pub async fn init(backend: Option<StoreBackend>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut config = load_global_config(&data_dir).await;
        if let Some(backend) = backend {
            config.registry.backend = backend;
        }

        let store = AnyExecutionStore::open(&config.registry, &data_dir).await?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            backend = ?store.backend(),
            "application state initialized"
        );
        Ok(Self::with_store(store, config, data_dir))
    }

    /// Wire services around an already-open store.
    pub fn with_store(store: AnyExecutionStore, config: GlobalConfig, data_dir: PathBuf) -> Self {
        let mut actions = ActionRegistry::new();
        register_builtin_actions(&mut actions, &config.services);

        let engine = WorkflowEngine::new(Arc::new(store), Arc::new(actions), config.engine.clone());

        Self {
            workflow_service: Arc::new(WorkflowService::new(engine)),
            config: Arc::new(config),
            data_dir,
        }
    }

    /// Register every valid template found under `dir`. Returns how many were registered.
    pub fn register_templates(&self, dir: &Path) -> anyhow::Result<usize> {
        let mut registered = 0;
        for (path, definition) in discover_workflows(dir)? {
            match self.workflow_service.register_definition(definition) {
                Ok(def) => {
                    tracing::info!(
                        path = %path.display(),
                        workflow = def.id.as_str(),
                        "template loaded"
                    );
                    registered += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "template rejected");
                }
            }
        }
        Ok(registered)
    }
}
