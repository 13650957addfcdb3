//! Sensitive header masking for call logs.

use std::collections::{BTreeMap, HashMap};

/// Replacement value for masked headers.
pub const REDACTED: &str = "[REDACTED]";

/// Whether a header may carry credentials.
///
/// Matches authorization and cookie headers exactly, and anything whose name
/// mentions an API or subscription key, a token, or a secret.
pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    matches!(
        name.as_str(),
        "authorization" | "proxy-authorization" | "cookie" | "set-cookie"
    ) || name.contains("api-key")
        || name.contains("apikey")
        || name.contains("subscription-key")
        || name.contains("token")
        || name.contains("secret")
}

/// Copy of `headers` safe to log, sorted by name.
pub fn redact_headers(headers: &HashMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if is_sensitive_header(name) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), shown)
        })
        .collect()
}
