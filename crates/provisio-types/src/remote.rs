//! Types for the resilient remote-call primitive.
//!
//! A `RemoteOperation` describes one call against an external administrative
//! service. `CallOptions` override the client-level `ClientConfig` for a single
//! call. Failures are classified into `CallErrorKind` so the retry loop can
//! tell transient failures from fatal ones.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Operation and options
// ---------------------------------------------------------------------------

/// HTTP method of a remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method '{other}'")),
        }
    }
}

/// A single remote call: target, method, headers, and optional payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteOperation {
    pub method: HttpMethod,
    /// Absolute URL, or a path joined onto `ClientConfig::base_url`.
    pub target: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RemoteOperation {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Per-call overrides of the client defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Fully resolved request handed to a transport for a single attempt.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Successful remote response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Decoded JSON body, or a JSON string when the body is not JSON.
    pub body: Value,
    /// Number of attempts it took to obtain this response.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    /// The attempt exceeded its deadline, or the remote answered 408.
    Timeout,
    /// The remote answered with HTTP 429.
    RateLimited,
    /// The remote answered with a 5xx status.
    Server,
    /// The connection could not be established or was reset.
    Connectivity,
    /// The remote rejected the request (4xx other than 408 and 429).
    Client,
    /// The request could not be built or the response could not be decoded.
    Invalid,
}

impl CallErrorKind {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => CallErrorKind::Timeout,
            429 => CallErrorKind::RateLimited,
            500..=599 => CallErrorKind::Server,
            _ => CallErrorKind::Client,
        }
    }

    /// Transient failures are retried; all others propagate immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            CallErrorKind::Timeout
                | CallErrorKind::RateLimited
                | CallErrorKind::Server
                | CallErrorKind::Connectivity
        )
    }
}

impl std::fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallErrorKind::Timeout => "timeout",
            CallErrorKind::RateLimited => "rate_limited",
            CallErrorKind::Server => "server_error",
            CallErrorKind::Connectivity => "connectivity",
            CallErrorKind::Client => "client_error",
            CallErrorKind::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Failure of a single attempt, as reported by a transport.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AttemptError {
    pub kind: CallErrorKind,
    /// HTTP status when the remote answered.
    pub status: Option<u16>,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::from_status(status),
            status: Some(status),
            message: format!("HTTP {status}: {}", body.into()),
        }
    }
}

/// Terminal failure of a remote call, after retries where applicable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("remote call failed after {attempts} attempt(s): {last}")]
pub struct CallError {
    /// Attempts consumed, including the failing one.
    pub attempts: u32,
    /// The last underlying failure.
    #[source]
    pub last: AttemptError,
}

impl CallError {
    pub fn kind(&self) -> CallErrorKind {
        self.last.kind
    }
}
