//! `noop` step action: echoes its resolved configuration.
//!
//! Useful for dry runs of a template and for rollback placeholders.

use provisio_core::workflow::action::{ActionInput, ActionMode, StepAction, StepError};
use serde_json::{Value, json};

pub struct NoopAction;

impl StepAction for NoopAction {
    async fn execute(&self, input: &ActionInput) -> Result<Value, StepError> {
        tracing::debug!(
            run_id = %input.run_id,
            step_id = input.step_id.as_str(),
            mode = ?input.mode,
            "noop step"
        );
        let config: serde_json::Map<String, Value> = input
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(json!({
            "step_id": input.step_id,
            "compensated": input.mode == ActionMode::Compensate,
            "config": config,
        }))
    }
}
