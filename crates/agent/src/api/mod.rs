// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only local query API.
//!
//! Served on the configured port (default 8088) and normally reached
//! through the controller's pull-through proxy, which adds
//! authentication and routing. CORS stays closed unless the operator
//! configures an origin.

pub mod files;

use crate::executor::WorkflowTable;
use crate::journal::Journal;
use crate::logging::LevelHandle;
use crate::logquery;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use convoy_core::{AgentConfig, AgentId, Clock, LogLevel, SystemClock};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Hard ceiling on request bodies; the configured upload cap is
/// enforced per-request below it.
const BODY_LIMIT: usize = 64 * 1024 * 1024;

pub struct ApiState {
    pub agent_id: Arc<Mutex<Option<AgentId>>>,
    pub hostname: String,
    pub platform: String,
    pub version: &'static str,
    pub public_key_pem: String,
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    pub config: Arc<RwLock<AgentConfig>>,
    pub workflows: Arc<WorkflowTable>,
    pub journal: Arc<Journal>,
    pub level: LevelHandle,
}

impl ApiState {
    fn agent_id_string(&self) -> Option<String> {
        self.agent_id.lock().as_ref().map(|id| id.as_str().to_string())
    }
}

pub fn router(state: Arc<ApiState>, cors_allowed_origin: Option<&str>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/info", get(info))
        .route("/logs", get(logs))
        .route("/logs/download", get(logs_download))
        .route("/workflows/executions", get(executions))
        .route("/workflows/state", get(workflows_state))
        .route("/metrics", get(metrics))
        .route("/loglevel", get(loglevel_get).post(loglevel_set))
        .route("/files/browse", get(files::browse))
        .route("/files/download", get(files::download))
        .route("/files/upload", post(files::upload))
        .route("/files/mkdir", post(files::mkdir))
        .route("/files/delete", delete(files::remove))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT));

    if let Some(origin) = cors_allowed_origin {
        match origin.parse::<HeaderValue>() {
            Ok(value) => {
                router = router.layer(
                    CorsLayer::new()
                        .allow_origin(value)
                        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
                        .allow_headers(tower_http::cors::AllowHeaders::mirror_request()),
                );
            }
            Err(_) => {
                tracing::warn!(%origin, "invalid CORS origin ignored; API stays same-origin");
            }
        }
    }
    router
}

async fn healthz(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "agentId": state.agent_id_string(),
        "time": SystemClock.epoch_ms(),
    }))
}

async fn info(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let config = state.config.read();
    Json(json!({
        "version": state.version,
        "platform": state.platform,
        "hostname": state.hostname,
        "agentId": state.agent_id_string(),
        "publicKey": state.public_key_pem,
        "sshServerPort": config.agent.ssh_server_port,
        "authorizedSshKeys": config.agent.authorized_ssh_keys.len(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsQuery {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    level: Option<LogLevel>,
    #[serde(default)]
    search: Option<String>,
}

async fn logs(State(state): State<Arc<ApiState>>, Query(query): Query<LogsQuery>) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(50).clamp(1, 500);
    match logquery::query(&state.log_path, page, page_size, query.level, query.search.as_deref())
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn logs_download(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(1000).clamp(1, 10_000);
    match logquery::tail_plain(&state.log_path, limit) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionsQuery {
    #[serde(default)]
    workflow_id: Option<String>,
}

async fn executions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ExecutionsQuery>,
) -> Json<serde_json::Value> {
    let records = state.journal.list(query.workflow_id.as_deref());
    Json(json!({"executions": records}))
}

async fn workflows_state(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let workflows: Vec<serde_json::Value> = state
        .workflows
        .list()
        .into_iter()
        .map(|w| {
            json!({
                "id": w.id,
                "name": w.name,
                "enabled": w.enabled,
                "trigger": w.trigger.kind(),
                "steps": w
                    .steps
                    .iter()
                    .map(|s| json!({"id": s.id, "type": s.step_type, "name": s.name}))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({"workflows": workflows}))
}

async fn metrics(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let log_size = std::fs::metadata(&state.log_path).map(|m| m.len()).unwrap_or(0);
    Json(json!({
        "agentId": state.agent_id_string(),
        "hostname": state.hostname,
        "platform": state.platform,
        "workflowsLoaded": state.workflows.len(),
        "logFileSize": log_size,
        "journalFileSize": state.journal.file_size(),
    }))
}

async fn loglevel_get(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({"currentLevel": state.level.current()}))
}

#[derive(Debug, Deserialize)]
struct LevelRequest {
    level: LogLevel,
}

async fn loglevel_set(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<LevelRequest>,
) -> Response {
    match state.level.set(request.level) {
        Ok(old_level) => {
            tracing::info!(
                oldLevel = %old_level,
                newLevel = %request.level,
                "Log level changed via API"
            );
            Json(json!({"currentLevel": request.level})).into_response()
        }
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))
                .into_response()
        }
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
