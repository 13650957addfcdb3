//! Transport port: one HTTP exchange, no retries, no deadline.
//!
//! The resilient client owns deadlines and retries; a transport only has to
//! perform a single request and classify failures that happen before a
//! status code is available (connectivity, malformed request).

use std::collections::HashMap;
use std::future::Future;

use provisio_types::remote::{AttemptError, PreparedRequest};
use serde_json::Value;

/// Raw response of one exchange, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Decoded JSON body, or a JSON string when the body is not JSON.
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single HTTP exchange.
///
/// Uses RPITIT (Rust 2024 native async traits).
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: &PreparedRequest,
    ) -> impl Future<Output = Result<TransportResponse, AttemptError>> + Send;
}
