//! `http` step action: one remote operation through a named service client.
//!
//! Step configuration:
//!
//! ```yaml
//! type: http
//! config:
//!   service: devops            # key of [services.<name>] in config.toml
//!   method: POST               # GET when omitted
//!   path: /_apis/projects      # or `url` for an absolute target
//!   headers: { Accept: application/json }
//!   body: { name: "{{ vars.project }}" }
//!   max_attempts: 5            # optional call-level overrides
//!   rollback:                  # operation used in compensate mode
//!     method: DELETE
//!     path: "/_apis/projects/{{ steps.create-project.output.body.id }}"
//! ```

use std::collections::HashMap;

use provisio_core::remote::{HttpTransport, ResilientClient};
use provisio_core::workflow::action::{ActionInput, ActionMode, StepAction, StepError};
use provisio_types::remote::{CallOptions, HttpMethod, RemoteOperation};
use serde::Deserialize;
use serde_json::{Value, json};

/// Client name used when a step does not name a service.
pub const DEFAULT_SERVICE: &str = "default";

/// Operation fields accepted in a step's configuration.
#[derive(Debug, Clone, Deserialize)]
struct HttpStepConfig {
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    base_delay_ms: Option<u64>,
    #[serde(default)]
    rollback: Option<Box<HttpStepConfig>>,
}

impl HttpStepConfig {
    fn parse(config: &HashMap<String, Value>) -> Result<Self, StepError> {
        let map = config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::from_value(Value::Object(map))
            .map_err(|e| StepError::InvalidConfig(e.to_string()))
    }

    fn operation(&self) -> Result<RemoteOperation, StepError> {
        let target = self
            .url
            .as_deref()
            .or(self.path.as_deref())
            .ok_or_else(|| {
                StepError::InvalidConfig("http step needs `url` or `path`".to_string())
            })?;
        Ok(RemoteOperation {
            method: self.method,
            target: target.to_string(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }

    fn options(&self) -> CallOptions {
        CallOptions {
            timeout_ms: self.timeout_ms,
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            headers: HashMap::new(),
        }
    }
}

/// Executes HTTP operations with one resilient client per external service.
pub struct HttpAction<T: HttpTransport> {
    clients: HashMap<String, ResilientClient<T>>,
}

impl<T: HttpTransport> HttpAction<T> {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, client: ResilientClient<T>) -> Self {
        self.clients.insert(name.into(), client);
        self
    }

    /// Configured service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T: HttpTransport> Default for HttpAction<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HttpTransport> StepAction for HttpAction<T> {
    async fn execute(&self, input: &ActionInput) -> Result<Value, StepError> {
        let parsed = HttpStepConfig::parse(&input.config)?;
        let call = match input.mode {
            ActionMode::Execute => parsed,
            ActionMode::Compensate => {
                let mut rollback = *parsed.rollback.ok_or_else(|| {
                    StepError::InvalidConfig("http step has no `rollback` operation".to_string())
                })?;
                if rollback.service.is_none() {
                    rollback.service = parsed.service;
                }
                rollback
            }
        };

        let service = call.service.as_deref().unwrap_or(DEFAULT_SERVICE);
        let client = self.clients.get(service).ok_or_else(|| {
            StepError::InvalidConfig(format!(
                "unknown service '{service}' (configured: {})",
                self.services().join(", ")
            ))
        })?;

        let operation = call.operation()?;
        tracing::debug!(
            run_id = %input.run_id,
            step_id = input.step_id.as_str(),
            service,
            method = %operation.method,
            mode = ?input.mode,
            "http step invoking remote operation"
        );

        let response = client.execute(&operation, &call.options()).await?;
        Ok(json!({
            "status": response.status,
            "body": response.body,
            "attempts": response.attempts,
        }))
    }
}
