//! Built-in step actions.
//!
//! - `http` -- one remote operation through a configured service client
//! - `noop` -- echoes its configuration (dry runs, placeholders)

pub mod http;
pub mod noop;

use std::collections::HashMap;

use provisio_core::remote::ResilientClient;
use provisio_core::workflow::action::ActionRegistry;
use provisio_types::config::ClientConfig;

use crate::config::resolve_service_token;
use crate::http::ReqwestTransport;

pub use self::http::{DEFAULT_SERVICE, HttpAction};
pub use self::noop::NoopAction;

/// Build the `http` action with one client per configured service.
///
/// A `default` service with stock settings is added when none is configured,
/// so steps using absolute URLs work without configuration.
pub fn build_http_action(services: &HashMap<String, ClientConfig>) -> HttpAction<ReqwestTransport> {
    let shared = reqwest::Client::new();
    let mut action = HttpAction::new();

    for (name, config) in services {
        let mut transport = ReqwestTransport::new(shared.clone());
        if let Some(token) = resolve_service_token(name, config) {
            transport = transport.with_bearer(token);
        }
        action = action.with_service(name.clone(), ResilientClient::new(config.clone(), transport));
    }
    if !services.contains_key(DEFAULT_SERVICE) {
        action = action.with_service(
            DEFAULT_SERVICE,
            ResilientClient::new(ClientConfig::default(), ReqwestTransport::new(shared)),
        );
    }
    action
}

/// Register every built-in action on `registry`.
pub fn register_builtin_actions(
    registry: &mut ActionRegistry,
    services: &HashMap<String, ClientConfig>,
) {
    let http = build_http_action(services);
    tracing::debug!(services = ?http.services(), "registering http action");
    registry.register("http", http);
    registry.register("noop", NoopAction);
    tracing::debug!(actions = ?registry.tags(), "built-in actions registered");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tags_registered() {
        let mut registry = ActionRegistry::new();
        register_builtin_actions(&mut registry, &HashMap::new());
        assert_eq!(registry.tags(), vec!["http", "noop"]);
    }

    #[test]
    fn test_http_action_has_configured_and_default_services() {
        let mut services = HashMap::new();
        services.insert(
            "devops".to_string(),
            ClientConfig {
                base_url: "https://dev.azure.com/contoso".to_string(),
                ..ClientConfig::default()
            },
        );
        let action = build_http_action(&services);
        assert_eq!(action.services(), vec!["default", "devops"]);
    }
}
