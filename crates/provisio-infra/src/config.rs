//! Global configuration loader for Provisio.
//!
//! Reads `config.toml` from the data directory (`~/.provisio/` by default)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use provisio_types::config::{ClientConfig, GlobalConfig};
use secrecy::SecretString;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PROVISIO_DATA_DIR";

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the data directory: `PROVISIO_DATA_DIR`, else `~/.provisio`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".provisio")
}

/// Read the bearer token of a service from the variable named by `token_env`.
///
/// Returns `None` when no variable is configured or it is unset. The value is
/// wrapped immediately and never logged.
pub fn resolve_service_token(service: &str, config: &ClientConfig) -> Option<SecretString> {
    let var = config.token_env.as_deref()?;
    match std::env::var(var) {
        Ok(token) if !token.is_empty() => Some(SecretString::from(token)),
        _ => {
            tracing::warn!(service, env = var, "service token variable is not set");
            None
        }
    }
}
