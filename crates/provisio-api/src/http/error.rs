//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use provisio_core::service::ServiceError;

use crate::http::response::{ApiResponse, ErrorEntry, RequestContext};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Workflow service errors.
    Service(ServiceError),
    /// Malformed request.
    Validation(String),
    /// No route matches the request path.
    NoRoute(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        AppError::Service(e)
    }
}

impl AppError {
    /// Status code and envelope errors.
    fn parts(&self) -> (StatusCode, Vec<ErrorEntry>) {
        match self {
            AppError::Service(ServiceError::Validation(violations)) => (
                StatusCode::BAD_REQUEST,
                violations
                    .iter()
                    .map(|v| ErrorEntry::new("VALIDATION_ERROR", v.as_str()))
                    .collect(),
            ),
            AppError::Service(ServiceError::UnknownDefinition(id)) => (
                StatusCode::NOT_FOUND,
                vec![ErrorEntry::new(
                    "DEFINITION_NOT_FOUND",
                    format!("Workflow definition '{id}' not found"),
                )],
            ),
            AppError::Service(ServiceError::UnknownOperation(id)) => (
                StatusCode::NOT_FOUND,
                vec![ErrorEntry::new("RUN_NOT_FOUND", format!("Execution '{id}' not found"))],
            ),
            AppError::Service(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                vec![ErrorEntry::new("WORKFLOW_ERROR", e.to_string())],
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                vec![ErrorEntry::new("VALIDATION_ERROR", msg.as_str())],
            ),
            AppError::NoRoute(path) => (
                StatusCode::NOT_FOUND,
                vec![ErrorEntry::new("NOT_FOUND", format!("No route for {path}"))],
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, errors) = self.parts();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "request failed");
        }
        let envelope = ApiResponse::failure(errors, &RequestContext::start());
        (status, Json(envelope)).into_response()
    }
}
