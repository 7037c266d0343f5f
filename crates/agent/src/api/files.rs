// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Constrained file browser.
//!
//! Every request path is resolved (symlinks included) and must land
//! under a whitelisted base; by default the agent data directory only.
//! Uploads are capped by `maxUploadSize`, listings by `maxListItems`.

use super::ApiState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use convoy_core::FileBrowserSettings;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
enum FileAccessError {
    #[error("file browser is disabled")]
    Disabled,

    #[error("path must be absolute")]
    NotAbsolute,

    #[error("path is outside the allowed base paths")]
    Outside,

    #[error("not found")]
    NotFound,

    #[error("upload exceeds the configured size cap")]
    TooLarge,

    #[error("{0}")]
    Io(String),
}

impl IntoResponse for FileAccessError {
    fn into_response(self) -> Response {
        let status = match &self {
            FileAccessError::Disabled | FileAccessError::Outside => StatusCode::FORBIDDEN,
            FileAccessError::NotAbsolute => StatusCode::BAD_REQUEST,
            FileAccessError::NotFound => StatusCode::NOT_FOUND,
            FileAccessError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            FileAccessError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    path: String,
}

fn settings(state: &ApiState) -> FileBrowserSettings {
    state.config.read().file_browser_settings.clone()
}

/// Whitelisted bases, canonicalized; default is the data dir only.
fn allowed_bases(state: &ApiState, settings: &FileBrowserSettings) -> Vec<PathBuf> {
    let configured: Vec<PathBuf> = if settings.allowed_paths.is_empty() {
        vec![state.data_dir.clone()]
    } else {
        settings.allowed_paths.clone()
    };
    configured.into_iter().filter_map(|p| p.canonicalize().ok()).collect()
}

fn check_allowed(resolved: &Path, bases: &[PathBuf]) -> Result<(), FileAccessError> {
    if bases.iter().any(|base| resolved.starts_with(base)) {
        Ok(())
    } else {
        Err(FileAccessError::Outside)
    }
}

/// Resolve a path that must already exist; symlink escapes fail the
/// whitelist check because canonicalization resolves them first.
fn resolve_existing(state: &ApiState, requested: &str) -> Result<PathBuf, FileAccessError> {
    let settings = settings(state);
    if !settings.enabled {
        return Err(FileAccessError::Disabled);
    }
    let path = PathBuf::from(requested);
    if !path.is_absolute() {
        return Err(FileAccessError::NotAbsolute);
    }
    let resolved = path.canonicalize().map_err(|_| FileAccessError::NotFound)?;
    check_allowed(&resolved, &allowed_bases(state, &settings))?;
    Ok(resolved)
}

/// Resolve a path that may not exist yet: the parent must exist and be
/// allowed; the final component is reattached after resolution.
fn resolve_for_create(state: &ApiState, requested: &str) -> Result<PathBuf, FileAccessError> {
    let settings = settings(state);
    if !settings.enabled {
        return Err(FileAccessError::Disabled);
    }
    let path = PathBuf::from(requested);
    if !path.is_absolute() {
        return Err(FileAccessError::NotAbsolute);
    }
    let name = path.file_name().ok_or(FileAccessError::NotAbsolute)?.to_os_string();
    let parent = path.parent().ok_or(FileAccessError::NotAbsolute)?;
    let resolved_parent = parent.canonicalize().map_err(|_| FileAccessError::NotFound)?;
    check_allowed(&resolved_parent, &allowed_bases(state, &settings))?;
    Ok(resolved_parent.join(name))
}

/// `GET /files/browse?path=`: bounded directory listing.
pub async fn browse(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let resolved = match resolve_existing(&state, &query.path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    let max_items = settings(&state).max_list_items;

    let read_dir = match std::fs::read_dir(&resolved) {
        Ok(read_dir) => read_dir,
        Err(e) => return FileAccessError::Io(e.to_string()).into_response(),
    };

    let mut entries = Vec::new();
    let mut truncated = false;
    for entry in read_dir.filter_map(|e| e.ok()) {
        if entries.len() >= max_items {
            truncated = true;
            break;
        }
        let metadata = entry.metadata().ok();
        let modified_ms = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "isDir": metadata.as_ref().is_some_and(|m| m.is_dir()),
            "size": metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            "modifiedMs": modified_ms,
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Json(json!({
        "path": resolved.display().to_string(),
        "entries": entries,
        "truncated": truncated,
    }))
    .into_response()
}

/// `GET /files/download?path=`
pub async fn download(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let resolved = match resolve_existing(&state, &query.path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    match tokio::fs::read(&resolved).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) => FileAccessError::Io(e.to_string()).into_response(),
    }
}

/// `POST /files/upload?path=`: raw body, capped by `maxUploadSize`.
pub async fn upload(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> Response {
    let resolved = match resolve_for_create(&state, &query.path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    if body.len() as u64 > settings(&state).max_upload_size {
        return FileAccessError::TooLarge.into_response();
    }
    match tokio::fs::write(&resolved, &body).await {
        Ok(()) => Json(json!({
            "path": resolved.display().to_string(),
            "size": body.len(),
        }))
        .into_response(),
        Err(e) => FileAccessError::Io(e.to_string()).into_response(),
    }
}

/// `POST /files/mkdir?path=`
pub async fn mkdir(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let resolved = match resolve_for_create(&state, &query.path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    match tokio::fs::create_dir(&resolved).await {
        Ok(()) => Json(json!({"path": resolved.display().to_string()})).into_response(),
        Err(e) => FileAccessError::Io(e.to_string()).into_response(),
    }
}

/// `DELETE /files/delete?path=`: files and empty directories only.
pub async fn remove(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let resolved = match resolve_existing(&state, &query.path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    let result = if resolved.is_dir() {
        tokio::fs::remove_dir(&resolved).await
    } else {
        tokio::fs::remove_file(&resolved).await
    };
    match result {
        Ok(()) => Json(json!({"deleted": resolved.display().to_string()})).into_response(),
        Err(e) => FileAccessError::Io(e.to_string()).into_response(),
    }
}
