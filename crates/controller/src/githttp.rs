// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smart-HTTP Git transport for the config repository.
//!
//! Exactly two verbs are admitted, fetch (`git-upload-pack`) and push
//! (`git-receive-pack`), and only against the single `config.git`
//! repository. Each request authenticates with the signed-header scheme
//! from `convoy_wire::auth`, verified against the agent registry; a fresh
//! agent cloning before registration fails cleanly with 401. The service
//! processes themselves are the system git binary in `--stateless-rpc`
//! mode.

use crate::auth::{self, AuthError};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use convoy_core::AgentId;
use convoy_wire::auth as wire_auth;
use serde::Deserialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// The two admitted services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "git-upload-pack" => Some(GitService::UploadPack),
            "git-receive-pack" => Some(GitService::ReceivePack),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    fn subcommand(self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }
}

/// Length-prefixed pkt-line framing for the service advertisement header.
pub fn pkt_line(payload: &str) -> Vec<u8> {
    let mut out = format!("{:04x}", payload.len() + 4).into_bytes();
    out.extend_from_slice(payload.as_bytes());
    out
}

/// Authenticate a Git request against the registry.
pub fn authenticate_git(state: &AppState, headers: &HeaderMap) -> Result<AgentId, AuthError> {
    let agent_id = header_str(headers, wire_auth::HEADER_AGENT).ok_or(AuthError::BadSignature)?;
    let timestamp_ms: u64 = header_str(headers, wire_auth::HEADER_TIMESTAMP)
        .and_then(|v| v.parse().ok())
        .ok_or(AuthError::BadSignature)?;
    let signature =
        header_str(headers, wire_auth::HEADER_SIGNATURE).ok_or(AuthError::BadSignature)?;

    let agent_id = AgentId::new(agent_id);
    let public_key = state.registry.public_key(&agent_id).ok_or(AuthError::BadSignature)?;
    let payload = wire_auth::git_payload(&agent_id, timestamp_ms);
    auth::verify_fresh_signature(
        &public_key,
        &payload,
        signature,
        timestamp_ms,
        state.clock_ms(),
    )?;
    Ok(agent_id)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Deserialize)]
pub struct InfoRefsParams {
    #[serde(default)]
    service: Option<String>,
}

/// `GET /config.git/info/refs?service=...`: ref advertisement.
pub async fn info_refs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InfoRefsParams>,
    headers: HeaderMap,
) -> Response {
    let Ok(agent_id) = authenticate_git(&state, &headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(service) = params.service.as_deref().and_then(GitService::parse) else {
        return (StatusCode::FORBIDDEN, "unsupported service").into_response();
    };
    tracing::debug!(%agent_id, service = service.wire_name(), "git ref advertisement");

    match run_git_service(&state, service, true, &[]).await {
        Ok(output) => {
            let mut body = pkt_line(&format!("# service={}\n", service.wire_name()));
            body.extend_from_slice(b"0000");
            body.extend_from_slice(&output);
            (
                StatusCode::OK,
                [
                    (
                        header::CONTENT_TYPE,
                        format!("application/x-{}-advertisement", service.wire_name()),
                    ),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(%agent_id, error = %e, "git advertisement failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `POST /config.git/git-upload-pack`: fetch.
pub async fn upload_pack(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    service_rpc(state, GitService::UploadPack, headers, body).await
}

/// `POST /config.git/git-receive-pack`: push; refreshes the mirror on
/// success.
pub async fn receive_pack(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    service_rpc(state, GitService::ReceivePack, headers, body).await
}

async fn service_rpc(
    state: Arc<AppState>,
    service: GitService,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(agent_id) = authenticate_git(&state, &headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match run_git_service(&state, service, false, &body).await {
        Ok(output) => {
            if service == GitService::ReceivePack {
                match state.store.sync_mirror(&state.registry).await {
                    Ok(synced) => {
                        tracing::info!(%agent_id, synced, "config push received, mirror refreshed");
                    }
                    Err(e) => {
                        tracing::error!(%agent_id, error = %e, "mirror refresh after push failed");
                    }
                }
            }
            (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    format!("application/x-{}-result", service.wire_name()),
                )],
                output,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(%agent_id, service = service.wire_name(), error = %e, "git service failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn run_git_service(
    state: &AppState,
    service: GitService,
    advertise: bool,
    input: &[u8],
) -> Result<Vec<u8>, std::io::Error> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg(service.subcommand()).arg("--stateless-rpc");
    if advertise {
        cmd.arg("--advertise-refs");
    }
    cmd.arg(state.store.repo_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
        drop(stdin);
    }
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "git {} exited with {}: {}",
            service.subcommand(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

#[cfg(test)]
#[path = "githttp_tests.rs"]
mod tests;
