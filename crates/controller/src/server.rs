// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface of the controller: admin API, Git transport, proxy.
//!
//! The admin API is the interface contract consumed by the (external)
//! web UI: token minting, registry views, command routing, workflow
//! deployment, and the alert sink. Everything shares one `AppState`.

use crate::alerts::AlertSink;
use crate::gitstore::ConfigStore;
use crate::githttp;
use crate::hub::Hub;
use crate::proxy;
use crate::registry::{AgentRecord, Registry};
use crate::tokens::{TokenRecord, TokenService, DEFAULT_TTL_SECS};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use convoy_core::{AgentId, AlertLevel, Clock, SystemClock, Workflow};
use convoy_wire::Command;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub tokens: Arc<TokenService>,
    pub alerts: Arc<AlertSink>,
    pub store: Arc<ConfigStore>,
    pub hub: Hub,
    pub proxy_client: reqwest::Client,
    pub proxy_timeout: Duration,
    clock: SystemClock,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        tokens: Arc<TokenService>,
        alerts: Arc<AlertSink>,
        store: Arc<ConfigStore>,
        hub: Hub,
        proxy_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tokens,
            alerts,
            store,
            hub,
            proxy_client: reqwest::Client::new(),
            proxy_timeout,
            clock: SystemClock,
        }
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/tokens", post(create_token).get(list_tokens))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}", get(get_agent).delete(delete_agent))
        .route("/api/agents/{id}/commands", post(send_command))
        .route(
            "/api/agents/{id}/workflows/{wid}",
            put(put_workflow).delete(delete_workflow),
        )
        .route("/api/agents/{id}/proxy/{*rest}", axum::routing::any(proxy::proxy_request))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/{id}/ack", post(ack_alert))
        .route("/config.git/info/refs", get(githttp::info_refs))
        .route("/config.git/git-upload-pack", post(githttp::upload_pack))
        .route("/config.git/git-receive-pack", post(githttp::receive_pack))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "agents": state.registry.list().len(),
        "connected": state.hub.connected_count(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest {
    #[serde(default)]
    ttl_secs: Option<u64>,
    #[serde(default)]
    pinned_api_address: Option<String>,
}

async fn create_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTokenRequest>,
) -> Response {
    let ttl = request.ttl_secs.unwrap_or(DEFAULT_TTL_SECS);
    match state.tokens.create(state.clock_ms(), ttl, request.pinned_api_address) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn list_tokens(State(state): State<Arc<AppState>>) -> Json<Vec<TokenRecord>> {
    Json(state.tokens.list())
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentRecord>> {
    Json(state.registry.list())
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.get(&AgentId::new(id)) {
        Some(record) => Json(record).into_response(),
        None => not_found("unknown agent"),
    }
}

async fn delete_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.registry.remove(&AgentId::new(id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::registry::RegistryError::UnknownAgent(_)) => not_found("unknown agent"),
        Err(e) => internal_error(e),
    }
}

async fn send_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(command): Json<Command>,
) -> Response {
    let agent_id = AgentId::new(id);
    match state.hub.send_command(&agent_id, command.clone()) {
        Ok(()) => Json(json!({"delivered": true, "command": command.name()})).into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({"delivered": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn put_workflow(
    State(state): State<Arc<AppState>>,
    Path((id, wid)): Path<(String, String)>,
    Json(workflow): Json<Workflow>,
) -> Response {
    let agent_id = AgentId::new(id);
    if state.registry.get(&agent_id).is_none() {
        return not_found("unknown agent");
    }
    if workflow.id != wid {
        return bad_request("workflow id does not match path");
    }
    if let Err(e) = workflow.validate() {
        return bad_request(&e.to_string());
    }

    if let Err(e) = state.store.upsert_workflow(&agent_id, &workflow).await {
        return internal_error(e);
    }
    // Best-effort notification; an offline agent catches up on reconnect.
    let notified = state.hub.send_command(&agent_id, Command::GitPull).is_ok();
    Json(json!({"deployed": true, "notified": notified})).into_response()
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path((id, wid)): Path<(String, String)>,
) -> Response {
    let agent_id = AgentId::new(id);
    if state.registry.get(&agent_id).is_none() {
        return not_found("unknown agent");
    }
    if let Err(e) = state.store.remove_workflow(&agent_id, &wid).await {
        return internal_error(e);
    }
    let notified = state
        .hub
        .send_command(&agent_id, Command::RemoveWorkflow { workflow_id: wid })
        .is_ok();
    Json(json!({"removed": true, "notified": notified})).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertQuery {
    #[serde(default)]
    min_level: Option<AlertLevel>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(100).min(1000);
    Json(state.alerts.list(query.min_level, limit)).into_response()
}

async fn ack_alert(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.alerts.acknowledge(&id) {
        Ok(()) => Json(json!({"acknowledged": true})).into_response(),
        Err(crate::alerts::AlertError::Unknown(_)) => not_found("unknown alert"),
        Err(e) => internal_error(e),
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
