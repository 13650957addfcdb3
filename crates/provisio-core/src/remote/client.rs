//! `ResilientClient`: executes one remote operation under a deadline with
//! classified failures and linear-backoff retries.
//!
//! Client-level `ClientConfig` supplies base URL, default headers, timeout,
//! attempt limit, and base delay; per-call `CallOptions` override them.
//! Retryable kinds (timeout, 429, 5xx, connectivity) consume attempts;
//! everything else propagates after the attempt that produced it.

use std::collections::HashMap;
use std::time::Duration;

use provisio_types::config::ClientConfig;
use provisio_types::remote::{
    AttemptError, CallError, CallErrorKind, CallOptions, PreparedRequest, RemoteOperation,
    RemoteResponse,
};
use serde_json::Value;
use tokio::time::Instant;

use crate::workflow::retry::RetryPolicy;

use super::redact::redact_headers;
use super::transport::HttpTransport;

/// Resilient call primitive over an `HttpTransport`.
pub struct ResilientClient<T: HttpTransport> {
    config: ClientConfig,
    transport: T,
}

impl<T: HttpTransport> ResilientClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve URL and headers for an operation.
    ///
    /// Header precedence, lowest first: client defaults, operation headers,
    /// call options. Names compare case-insensitively.
    pub fn prepare(
        &self,
        operation: &RemoteOperation,
        options: &CallOptions,
    ) -> Result<PreparedRequest, AttemptError> {
        let url = self.resolve_url(&operation.target)?;

        let mut headers = HashMap::new();
        for layer in [&self.config.default_headers, &operation.headers, &options.headers] {
            for (name, value) in layer {
                headers.retain(|existing: &String, _| !existing.eq_ignore_ascii_case(name));
                headers.insert(name.clone(), value.clone());
            }
        }

        Ok(PreparedRequest {
            method: operation.method,
            url,
            headers,
            body: operation.body.clone(),
        })
    }

    fn resolve_url(&self, target: &str) -> Result<String, AttemptError> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.to_string());
        }
        if self.config.base_url.is_empty() {
            return Err(AttemptError::new(
                CallErrorKind::Invalid,
                format!("relative target '{target}' requires a base_url"),
            ));
        }
        Ok(format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            target.trim_start_matches('/')
        ))
    }

    /// Execute an operation, retrying retryable failures.
    ///
    /// Returns the successful response with the number of attempts used, or a
    /// `CallError` wrapping the last failure and the attempt count.
    pub async fn execute(
        &self,
        operation: &RemoteOperation,
        options: &CallOptions,
    ) -> Result<RemoteResponse, CallError> {
        let request = self
            .prepare(operation, options)
            .map_err(|last| CallError { attempts: 0, last })?;

        let timeout_ms = options.timeout_ms.unwrap_or(self.config.timeout_ms);
        let timeout = Duration::from_millis(timeout_ms);
        let policy = RetryPolicy::new(
            options.max_attempts.unwrap_or(self.config.max_attempts),
            Duration::from_millis(options.base_delay_ms.unwrap_or(self.config.base_delay_ms)),
        );
        let logged_headers = redact_headers(&request.headers);

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                method = %request.method,
                url = request.url.as_str(),
                headers = ?logged_headers,
                attempt,
                max_attempts = policy.max_attempts,
                timeout_ms,
                "remote call"
            );

            let started = Instant::now();
            let outcome = match tokio::time::timeout(timeout, self.transport.send(&request)).await {
                Ok(Ok(response)) if response.is_success() => Ok(response),
                Ok(Ok(response)) => Err(AttemptError::from_status(
                    response.status,
                    body_excerpt(&response.body),
                )),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AttemptError::new(
                    CallErrorKind::Timeout,
                    format!("no response within {timeout_ms} ms"),
                )),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) => {
                    tracing::info!(
                        method = %request.method,
                        url = request.url.as_str(),
                        status = response.status,
                        attempt,
                        elapsed_ms,
                        "remote call succeeded"
                    );
                    return Ok(RemoteResponse {
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                        attempts: attempt,
                    });
                }
                Err(e) if e.kind.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        method = %request.method,
                        url = request.url.as_str(),
                        kind = %e.kind,
                        status = ?e.status,
                        attempt,
                        elapsed_ms,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        method = %request.method,
                        url = request.url.as_str(),
                        kind = %e.kind,
                        status = ?e.status,
                        attempt,
                        elapsed_ms,
                        error = e.message.as_str(),
                        "remote call failed"
                    );
                    return Err(CallError {
                        attempts: attempt,
                        last: e,
                    });
                }
            }
        }
    }
}

/// Short, single-line rendering of an error body for messages.
fn body_excerpt(body: &Value) -> String {
    const MAX: usize = 512;
    let text = match body {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
