//! reqwest-backed `HttpTransport`.
//!
//! Performs exactly one exchange per `send`. Deadlines and retries belong to
//! the `ResilientClient` wrapping this transport. An optional bearer token is
//! held as a [`SecretString`] and only exposed while building the request.

use std::collections::HashMap;

use provisio_core::remote::{HttpTransport, TransportResponse};
use provisio_types::remote::{AttemptError, CallErrorKind, HttpMethod, PreparedRequest};
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

/// Single-attempt HTTP transport over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    bearer: Option<SecretString>,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            bearer: None,
        }
    }

    /// Attach a bearer token sent as `Authorization` unless the request
    /// already carries one.
    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

// Manual Debug so the bearer never appears in output.
impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<TransportResponse, AttemptError> {
        let mut builder = self
            .client
            .request(Self::method(request.method), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let has_auth = request
            .headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
        if let (Some(token), false) = (&self.bearer, has_auth) {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let text = response.text().await.map_err(classify)?;

        Ok(TransportResponse {
            status,
            headers,
            body: decode_body(&text),
        })
    }
}

/// Map a reqwest failure onto the call error taxonomy.
///
/// Only failures to reach the remote or to get the request onto the wire
/// count as connectivity. Redirect loops, unreadable bodies and malformed
/// requests will not improve on retry.
fn classify(err: reqwest::Error) -> AttemptError {
    let kind = if err.is_timeout() {
        CallErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        CallErrorKind::Connectivity
    } else {
        CallErrorKind::Invalid
    };
    AttemptError::new(kind, err.to_string())
}

/// JSON when the body parses as JSON, a JSON string otherwise, null when empty.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
