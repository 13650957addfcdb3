//! Step actions: the pluggable units of work bound to step type tags.
//!
//! Dispatch uses the blanket-impl pattern:
//! 1. `StepAction` uses RPITIT for zero-cost static dispatch
//! 2. `StepActionDyn` is the object-safe twin with boxed futures
//! 3. `BoxStepAction` wraps `Box<dyn StepActionDyn>` for the registry

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use provisio_types::remote::CallError;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Input and errors
// ---------------------------------------------------------------------------

/// Whether an action runs forward or undoes a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    Execute,
    Compensate,
}

/// Everything an action receives for one invocation.
#[derive(Debug, Clone)]
pub struct ActionInput {
    pub run_id: Uuid,
    pub step_id: String,
    /// 1-based attempt number of the step-level retry loop.
    pub attempt: u32,
    pub mode: ActionMode,
    /// Step configuration with templates already resolved.
    pub config: HashMap<String, Value>,
    /// Output of the step being compensated (`Compensate` mode only).
    pub previous_output: Option<Value>,
}

/// Errors produced by a single action invocation.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("step timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("step cancelled")]
    Cancelled,

    #[error("no action registered for step type '{0}'")]
    UnregisteredAction(String),

    #[error("invalid step configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Remote(#[from] CallError),
}

impl StepError {
    /// Whether the step-level loop may re-invoke the action.
    ///
    /// Remote failures the call primitive classified as fatal are not retried
    /// at the step level either.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Failed(_) | StepError::Timeout { .. } => true,
            StepError::Remote(e) => e.kind().is_retryable(),
            StepError::Cancelled
            | StepError::UnregisteredAction(_)
            | StepError::InvalidConfig(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// StepAction trait
// ---------------------------------------------------------------------------

/// An asynchronous unit of work selected by a step's type tag.
///
/// Uses RPITIT (Rust 2024 native async traits). For dynamic dispatch,
/// use `BoxStepAction`.
pub trait StepAction: Send + Sync {
    /// Execute (or compensate) once and return the step output.
    fn execute(&self, input: &ActionInput) -> impl Future<Output = Result<Value, StepError>> + Send;
}

/// Object-safe version of [`StepAction`] with boxed futures.
pub trait StepActionDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a ActionInput,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;
}

/// Blanket implementation: any `StepAction` automatically implements `StepActionDyn`.
impl<T: StepAction> StepActionDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        input: &'a ActionInput,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.execute(input))
    }
}

/// Type-erased step action stored in the registry.
pub struct BoxStepAction {
    inner: Box<dyn StepActionDyn>,
}

impl BoxStepAction {
    pub fn new<T: StepAction + 'static>(action: T) -> Self {
        Self {
            inner: Box::new(action),
        }
    }

    pub async fn execute(&self, input: &ActionInput) -> Result<Value, StepError> {
        self.inner.execute_boxed(input).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Actions indexed by step type tag.
///
/// Built once at startup and shared read-only by every run.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<BoxStepAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under a type tag, replacing any previous binding.
    pub fn register<T: StepAction + 'static>(&mut self, tag: impl Into<String>, action: T) {
        self.actions
            .insert(tag.into(), Arc::new(BoxStepAction::new(action)));
    }

    /// Look up the action bound to a tag.
    pub fn get(&self, tag: &str) -> Result<Arc<BoxStepAction>, StepError> {
        self.actions
            .get(tag)
            .cloned()
            .ok_or_else(|| StepError::UnregisteredAction(tag.to_string()))
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_types::remote::AttemptError;
    use serde_json::json;

    struct Echo;

    impl StepAction for Echo {
        async fn execute(&self, input: &ActionInput) -> Result<Value, StepError> {
            Ok(json!({ "step": input.step_id, "attempt": input.attempt }))
        }
    }

    fn input() -> ActionInput {
        ActionInput {
            run_id: Uuid::nil(),
            step_id: "create-project".to_string(),
            attempt: 1,
            mode: ActionMode::Execute,
            config: HashMap::new(),
            previous_output: None,
        }
    }

    #[tokio::test]
    async fn test_registered_action_dispatches() {
        let mut registry = ActionRegistry::new();
        registry.register("echo", Echo);
        let action = registry.get("echo").unwrap();
        let output = action.execute(&input()).await.unwrap();
        assert_eq!(output["step"], json!("create-project"));
        assert_eq!(registry.tags(), vec!["echo"]);
    }

    #[test]
    fn test_unregistered_tag_is_an_error() {
        let registry = ActionRegistry::new();
        let err = registry.get("provision_environment").err().unwrap();
        assert!(matches!(
            err,
            StepError::UnregisteredAction(ref t) if t == "provision_environment"
        ));
        assert!(err.to_string().contains("no action registered"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_remote_error_retryability_follows_classification() {
        let fatal = StepError::from(CallError {
            attempts: 1,
            last: AttemptError::from_status(400, "bad request"),
        });
        let transient = StepError::from(CallError {
            attempts: 3,
            last: AttemptError::from_status(503, "unavailable"),
        });
        assert!(!fatal.is_retryable());
        assert!(transient.is_retryable());
        assert!(StepError::Timeout { timeout_ms: 10 }.is_retryable());
    }
}
