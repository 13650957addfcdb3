//! Workflow definition and run handlers for the REST API.
//!
//! Definitions are validated on registration; runs start in the background
//! and are polled through `/runs/{run_id}`.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use provisio_types::workflow::{WorkflowDefinition, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestContext};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

/// Query parameters for listing runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Only runs of this definition.
    #[serde(default)]
    pub definition_id: Option<String>,
    /// Maximum number of runs to return (default 20).
    #[serde(default = "default_run_limit")]
    pub limit: usize,
}

fn default_run_limit() -> usize {
    20
}

const MAX_RUN_LIMIT: usize = 500;

/// Body of `POST /definitions/{id}/runs`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// Listing entry for a registered definition.
#[derive(Debug, Serialize)]
pub struct DefinitionSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub phases: Vec<String>,
    pub steps: usize,
    pub parallel_groups: usize,
    pub rollback_steps: usize,
}

impl From<&WorkflowDefinition> for DefinitionSummary {
    fn from(d: &WorkflowDefinition) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            version: d.version.clone(),
            phases: d.phases.clone(),
            steps: d.steps.len(),
            parallel_groups: d.parallel_groups.len(),
            rollback_steps: d.rollback_steps.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub definition_id: String,
}

#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    pub run_id: Uuid,
    /// `false` when the run had already finished.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the workflow sub-router, mounted at `/api/v1`.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/definitions", post(register_definition).get(list_definitions))
        .route("/definitions/{id}", get(get_definition))
        .route("/definitions/{id}/runs", post(start_run))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/cancel", post(cancel_run))
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// POST /api/v1/definitions - Validate and register a definition.
pub async fn register_definition(
    State(state): State<AppState>,
    Json(body): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<ApiResponse<DefinitionSummary>>), AppError> {
    let ctx = RequestContext::start();

    let def = state.workflow_service.register_definition(body)?;

    let resp = ApiResponse::success(DefinitionSummary::from(def.as_ref()), &ctx)
        .with_link("self", format!("/api/v1/definitions/{}", def.id))
        .with_link("runs", format!("/api/v1/definitions/{}/runs", def.id));
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/definitions - List registered definitions.
pub async fn list_definitions(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<DefinitionSummary>>> {
    let ctx = RequestContext::start();

    let defs: Vec<DefinitionSummary> = state
        .workflow_service
        .list_definitions()
        .iter()
        .map(|d| DefinitionSummary::from(d.as_ref()))
        .collect();

    Json(ApiResponse::success(defs, &ctx).with_link("self", "/api/v1/definitions"))
}

/// GET /api/v1/definitions/{id} - Full definition.
pub async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let ctx = RequestContext::start();

    let def = state
        .workflow_service
        .get_definition(&id)
        .ok_or_else(|| provisio_core::service::ServiceError::UnknownDefinition(id.clone()))?;

    let resp = ApiResponse::success(def.as_ref().clone(), &ctx)
        .with_link("self", format!("/api/v1/definitions/{id}"));
    Ok(Json(resp))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// POST /api/v1/definitions/{id}/runs - Start a run; returns before it finishes.
pub async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<StartRunRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<RunAccepted>>), AppError> {
    let ctx = RequestContext::start();

    let Json(request) = body.unwrap_or_default();
    let run_id = state
        .workflow_service
        .start_run(&id, request.variables)
        .await?;

    let accepted = RunAccepted {
        run_id,
        definition_id: id,
    };
    let resp = ApiResponse::success(accepted, &ctx)
        .with_link("status", format!("/api/v1/runs/{run_id}"))
        .with_link("cancel", format!("/api/v1/runs/{run_id}/cancel"));
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

/// GET /api/v1/runs - Recent runs, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowExecution>>>, AppError> {
    let ctx = RequestContext::start();

    if query.limit == 0 || query.limit > MAX_RUN_LIMIT {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {MAX_RUN_LIMIT}"
        )));
    }

    let runs = state
        .workflow_service
        .list_runs(query.definition_id.as_deref(), query.limit)
        .await?;

    Ok(Json(ApiResponse::success(runs, &ctx).with_link("self", "/api/v1/runs")))
}

/// GET /api/v1/runs/{run_id} - Current run snapshot.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let ctx = RequestContext::start();

    let run = state.workflow_service.get_status(run_id).await?;

    let resp = ApiResponse::success(run, &ctx)
        .with_link("self", format!("/api/v1/runs/{run_id}"));
    Ok(Json(resp))
}

/// POST /api/v1/runs/{run_id}/cancel - Request cancellation.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CancelOutcome>>, AppError> {
    let ctx = RequestContext::start();

    let cancelled = state.workflow_service.cancel_run(run_id).await?;

    let resp = ApiResponse::success(CancelOutcome { run_id, cancelled }, &ctx)
        .with_link("status", format!("/api/v1/runs/{run_id}"));
    Ok(Json(resp))
}
