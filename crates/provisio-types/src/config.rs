//! Global configuration types for Provisio.
//!
//! `GlobalConfig` represents the top-level `config.toml`: engine limits,
//! operation-registry retention, and one client section per external
//! administrative service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.provisio/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Client settings keyed by service name (e.g. "devops", "power_platform", "graph").
    #[serde(default)]
    pub services: HashMap<String, ClientConfig>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Execution engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Runs allowed to execute at the same time; others wait as `pending`.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Timeout applied to steps that leave `timeout_ms` at zero.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Base delay of the step-level linear backoff between attempts.
    #[serde(default = "default_step_retry_base_delay_ms")]
    pub step_retry_base_delay_ms: u64,

    /// Optional deadline for a whole run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,
}

fn default_max_concurrent_runs() -> usize {
    16
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_step_retry_base_delay_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            default_step_timeout_ms: default_step_timeout_ms(),
            step_retry_base_delay_ms: default_step_retry_base_delay_ms(),
            run_timeout_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation registry
// ---------------------------------------------------------------------------

/// Storage medium of the operation registry used by `serve`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local map; runs vanish on restart.
    Memory,
    /// `{data_dir}/provisio.db`, shared with the CLI.
    #[default]
    Sqlite,
}

/// Operation registry storage and eviction policy for finished runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Seconds a terminal run stays queryable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Maximum number of runs held before the oldest terminal ones are evicted.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_retention_secs() -> u64 {
    3_600
}

fn default_capacity() -> usize {
    1_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            retention_secs: default_retention_secs(),
            capacity: default_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote clients
// ---------------------------------------------------------------------------

/// Client-level defaults for the resilient call primitive.
///
/// Per-call `CallOptions` override these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL that relative operation targets are joined onto.
    #[serde(default)]
    pub base_url: String,

    /// Headers sent with every call.
    #[serde(default)]
    pub default_headers: HashMap<String, String>,

    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_client_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_client_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

fn default_client_timeout_ms() -> u64 {
    30_000
}

fn default_client_max_attempts() -> u32 {
    3
}

fn default_client_base_delay_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            default_headers: HashMap::new(),
            timeout_ms: default_client_timeout_ms(),
            max_attempts: default_client_max_attempts(),
            base_delay_ms: default_client_base_delay_ms(),
            token_env: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.max_concurrent_runs, 16);
        assert_eq!(config.engine.step_retry_base_delay_ms, 500);
        assert_eq!(config.registry.retention_secs, 3_600);
        assert!(config.services.is_empty());
    }

    #[test]
    fn test_global_config_deserialize_empty() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.default_step_timeout_ms, 300_000);
        assert_eq!(config.registry.capacity, 1_000);
        assert_eq!(config.registry.backend, StoreBackend::Sqlite);
        assert!(config.engine.run_timeout_ms.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_services() {
        let toml_str = r#"
[engine]
max_concurrent_runs = 4
run_timeout_ms = 900000

[registry]
backend = "memory"
capacity = 50

[services.devops]
base_url = "https://dev.azure.com/contoso"
token_env = "DEVOPS_PAT"
max_attempts = 5

[services.devops.default_headers]
Accept = "application/json"

[services.graph]
base_url = "https://graph.microsoft.com/v1.0"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_concurrent_runs, 4);
        assert_eq!(config.engine.run_timeout_ms, Some(900_000));
        assert_eq!(config.registry.backend, StoreBackend::Memory);
        assert_eq!(config.registry.capacity, 50);
        assert_eq!(config.registry.retention_secs, 3_600);

        let devops = &config.services["devops"];
        assert_eq!(devops.max_attempts, 5);
        assert_eq!(devops.timeout_ms, 30_000);
        assert_eq!(devops.token_env.as_deref(), Some("DEVOPS_PAT"));
        assert_eq!(devops.default_headers["Accept"], "application/json");

        let graph = &config.services["graph"];
        assert_eq!(graph.base_delay_ms, 1_000);
    }
}
