//! Axum router configuration with middleware.
//!
//! All workflow routes are under `/api/v1/`; `/health` sits at the root.
//! Middleware: CORS, tracing.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::error::AppError;
use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", handlers::workflow::workflow_routes())
        .route("/health", get(health_check))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found(uri: axum::http::Uri) -> AppError {
    AppError::NoRoute(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use provisio_infra::memory::InMemoryExecutionStore;
    use provisio_infra::store::AnyExecutionStore;
    use provisio_types::config::GlobalConfig;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_router(dir: &tempfile::TempDir) -> Router {
        let store = AnyExecutionStore::Memory(InMemoryExecutionStore::new(
            Duration::from_secs(3600),
            100,
        ));
        let state = AppState::with_store(store, GlobalConfig::default(), dir.path().to_path_buf());
        build_router(state)
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn noop_definition() -> Value {
        json!({
            "id": "project-bootstrap",
            "name": "Project bootstrap",
            "version": "1.0.0",
            "phases": ["plan", "provision"],
            "steps": [
                { "id": "plan", "name": "Plan", "type": "noop", "phase": "plan",
                  "config": { "project": "{{ variables.project }}" } },
                { "id": "create-repo", "name": "Create repo", "type": "noop",
                  "phase": "provision", "depends_on": ["plan"] }
            ]
        })
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(&dir);
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_register_invalid_definition_lists_violations() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(&dir);
        let mut def = noop_definition();
        def["steps"][1]["phase"] = json!("teardown");
        def["steps"][1]["depends_on"] = json!(["missing"]);

        let (status, body) = send(&router, Method::POST, "/api/v1/definitions", Some(def)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e["code"] == "VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_unknown_run_and_definition_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(&dir);

        let uri = format!("/api/v1/runs/{}", Uuid::now_v7());
        let (status, body) = send(&router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "RUN_NOT_FOUND");

        let (status, body) =
            send(&router, Method::POST, "/api/v1/definitions/nope/runs", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "DEFINITION_NOT_FOUND");

        let (status, body) = send(&router, Method::GET, "/api/v1/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_start_run_then_poll_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(&dir);

        let (status, body) =
            send(&router, Method::POST, "/api/v1/definitions", Some(noop_definition())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["steps"], 2);

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/v1/definitions/project-bootstrap/runs",
            Some(json!({ "variables": { "project": "contoso-web" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["data"]["run_id"].as_str().unwrap().to_string();
        let status_link = body["_links"]["status"].as_str().unwrap().to_string();
        assert_eq!(status_link, format!("/api/v1/runs/{run_id}"));

        let mut run = Value::Null;
        for _ in 0..100 {
            let (status, body) = send(&router, Method::GET, &status_link, None).await;
            assert_eq!(status, StatusCode::OK);
            run = body["data"].clone();
            if run["status"] == "completed" || run["status"] == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(run["status"], "completed");

        let (status, body) = send(
            &router,
            Method::GET,
            "/api/v1/runs?definition_id=project-bootstrap",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let cancel = format!("/api/v1/runs/{run_id}/cancel");
        let (status, body) = send(&router, Method::POST, &cancel, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cancelled"], false);
    }

    #[tokio::test]
    async fn test_list_runs_rejects_zero_limit() {
        let dir = tempfile::tempdir().unwrap();
        let router = test_router(&dir);
        let (status, _) = send(&router, Method::GET, "/api/v1/runs?limit=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
