//! JSON envelope shared by every API response.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [{ "code": "RUN_NOT_FOUND", "message": "..." }],
//!   "_links": { "status": "/api/v1/runs/..." }
//! }
//! ```
//!
//! `data` is absent on failures and `errors` is absent on success. The HTTP
//! status is chosen by the caller, never derived from the envelope.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Correlation id and start time of the request being answered.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    request_id: Uuid,
    started: Instant,
}

impl RequestContext {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            started: Instant::now(),
        }
    }

    fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            request_id: self.request_id,
            timestamp: Utc::now(),
            response_time_ms: u64::try_from(self.started.elapsed().as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ResponseMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    /// Related resources, keyed by relation.
    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// One machine-readable failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub code: &'static str,
    pub message: String,
}

impl ErrorEntry {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, ctx: &RequestContext) -> Self {
        Self {
            data: Some(data),
            meta: ctx.meta(),
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &'static str, href: impl Into<String>) -> Self {
        self.links.insert(rel, href.into());
        self
    }
}

impl ApiResponse<()> {
    /// Envelope carrying only errors.
    pub fn failure(errors: Vec<ErrorEntry>, ctx: &RequestContext) -> Self {
        Self {
            data: None,
            meta: ctx.meta(),
            errors,
            links: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_omits_errors_and_orders_links() {
        let ctx = RequestContext::start();
        let resp = ApiResponse::success(json!({ "run_id": "r-1" }), &ctx)
            .with_link("status", "/api/v1/runs/r-1")
            .with_link("cancel", "/api/v1/runs/r-1/cancel");
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["data"]["run_id"], "r-1");
        assert!(value.get("errors").is_none());
        let rels: Vec<&String> = value["_links"].as_object().unwrap().keys().collect();
        assert_eq!(rels, ["cancel", "status"]);
        assert_eq!(value["meta"]["request_id"], json!(ctx.request_id.to_string()));
    }

    #[test]
    fn test_failure_omits_data_and_links() {
        let ctx = RequestContext::start();
        let resp = ApiResponse::failure(
            vec![
                ErrorEntry::new("VALIDATION_ERROR", "duplicate step ID: 'a'"),
                ErrorEntry::new("VALIDATION_ERROR", "unknown phase 'teardown'"),
            ],
            &ctx,
        );
        let value = serde_json::to_value(&resp).unwrap();

        assert!(value.get("data").is_none());
        assert!(value.get("_links").is_none());
        assert_eq!(value["errors"].as_array().unwrap().len(), 2);
        assert_eq!(value["errors"][1]["message"], "unknown phase 'teardown'");
    }
}
