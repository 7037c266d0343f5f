// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pull-through proxy to agent local APIs.
//!
//! Operators never dial agents directly: the controller resolves the
//! agent's address (operator-pinned first, then the session-observed IP
//! plus reported API port) and forwards the request with a bounded
//! timeout. Responses stream back with status and content type intact.

use crate::server::AppState;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use convoy_core::AgentId;
use std::sync::Arc;

/// Upper bound on proxied request bodies.
const MAX_PROXY_BODY: usize = 64 * 1024 * 1024;

/// `ANY /api/agents/{id}/proxy/{*rest}`
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    Path((id, rest)): Path<(String, String)>,
    request: Request,
) -> Response {
    let agent_id = AgentId::new(id);
    let Some(record) = state.registry.get(&agent_id) else {
        return (StatusCode::NOT_FOUND, "unknown agent").into_response();
    };
    let Some(address) = record.api_address() else {
        return (StatusCode::BAD_GATEWAY, "agent has no known API address").into_response();
    };

    let method = request.method().clone();
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    let url = format!("http://{}/{}{}", address, rest, query);

    let body = match axum::body::to_bytes(request.into_body(), MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response(),
    };

    // reqwest and axum sit on different `http` majors; bridge by value.
    let method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return (StatusCode::METHOD_NOT_ALLOWED, "unsupported method").into_response(),
    };

    tracing::debug!(%agent_id, %url, "proxying to agent");
    let upstream = state
        .proxy_client
        .request(method, &url)
        .timeout(state.proxy_timeout)
        .body(body.to_vec())
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            match resp.bytes().await {
                Ok(bytes) => (
                    status,
                    [(header::CONTENT_TYPE, content_type)],
                    bytes.to_vec(),
                )
                    .into_response(),
                Err(e) => {
                    tracing::warn!(%agent_id, error = %e, "proxy body read failed");
                    (StatusCode::BAD_GATEWAY, "agent response unreadable").into_response()
                }
            }
        }
        Err(e) if e.is_timeout() => {
            tracing::warn!(%agent_id, "proxy timeout");
            (StatusCode::GATEWAY_TIMEOUT, "agent did not respond in time").into_response()
        }
        Err(e) => {
            tracing::warn!(%agent_id, error = %e, "proxy request failed");
            (StatusCode::BAD_GATEWAY, "agent unreachable").into_response()
        }
    }
}
