//! Read-only HTTP endpoints: health, cached results and templates.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use tilecast_core::TemplateId;
use tilecast_live::{LiveMessage, LoopState};

use crate::state::AppState;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_response(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: msg.into() }))
}

fn loop_label(state: LoopState) -> &'static str {
    match state {
        LoopState::Running => "running",
        LoopState::Stopping => "stopping",
        LoopState::Stopped => "stopped",
    }
}

// ── Health ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
    pub cached_results: usize,
    pub scheduler: String,
    pub health_monitor: String,
}

/// Server liveness and live-subsystem counters
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.hub.registry().len(),
        cached_results: state.hub.cache().len(),
        scheduler: loop_label(state.scheduler.state()).to_string(),
        health_monitor: loop_label(state.monitor.state()).to_string(),
    })
}

// ── Live results ─────────────────────────────────────────────────

/// Current cached result of every template, as `template_result` messages
#[utoipa::path(
    get,
    path = "/api/live/results",
    tag = "Live",
    responses((status = 200, description = "Cached results ordered by template id", body = Object))
)]
pub async fn live_results(State(state): State<Arc<AppState>>) -> Json<Vec<LiveMessage>> {
    let messages = state
        .hub
        .cache()
        .snapshot()
        .iter()
        .map(|r| LiveMessage::from(r.as_ref()))
        .collect();
    Json(messages)
}

/// Cached result of one template
#[utoipa::path(
    get,
    path = "/api/live/results/{id}",
    tag = "Live",
    params(("id" = i64, Path, description = "Template id")),
    responses(
        (status = 200, description = "Cached result", body = Object),
        (status = 404, description = "No result cached for this template", body = ErrorResponse)
    )
)]
pub async fn live_result_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TemplateId>,
) -> ApiResult<LiveMessage> {
    state
        .hub
        .cache()
        .get(id)
        .map(|r| Json(LiveMessage::from(r.as_ref())))
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("no cached result for template {}", id)))
}

// ── Templates ────────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub name: String,
    pub description: Option<String>,
    pub refresh_rate: i64,
    pub widget_type: Option<String>,
    pub schedulable: bool,
    #[schema(value_type = Option<String>)]
    pub last_execution: Option<chrono::DateTime<chrono::Utc>>,
    pub has_result: bool,
}

/// Templates known to the store
#[utoipa::path(
    get,
    path = "/api/templates",
    tag = "Templates",
    responses(
        (status = 200, description = "All templates", body = [TemplateSummary]),
        (status = 503, description = "Template store unavailable", body = ErrorResponse)
    )
)]
pub async fn templates_list(State(state): State<Arc<AppState>>) -> ApiResult<Vec<TemplateSummary>> {
    let templates = state
        .store
        .list_schedulable()
        .await
        .map_err(|e| error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    let cache = state.hub.cache();
    let summaries = templates
        .into_iter()
        .map(|t| TemplateSummary {
            id: t.id,
            schedulable: t.is_schedulable(),
            has_result: cache.get(t.id).is_some(),
            last_execution: t.last_executed_at,
            refresh_rate: t.refresh_interval_secs,
            name: t.info.name,
            description: t.info.description,
            widget_type: t.info.widget_type,
        })
        .collect();
    Ok(Json(summaries))
}
