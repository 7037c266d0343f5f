// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step catalog.
//!
//! Each step type takes the substituted config map and returns the
//! outputs it adds to context. Unknown types are a named sentinel that
//! always fails with no side effects, so a typo'd workflow dies loudly
//! instead of silently skipping work.

use crate::outbound::OutboundHandle;
use convoy_core::AlertLevel;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("missing required config field `{0}`")]
    MissingField(&'static str),

    #[error("config field `{field}` must be {expected}")]
    InvalidField { field: &'static str, expected: &'static str },

    #[error("{operation} failed for {path}: {source}")]
    FileOperation {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command exited with code {exit_code}: {output}")]
    CommandFailed { exit_code: i32, output: String },

    #[error("command could not be spawned: {0}")]
    Spawn(std::io::Error),

    #[error("step type `{0}` is not implemented")]
    NotImplemented(String),
}

/// Execute one step by type tag.
///
/// Output keys per type:
/// - `copy-file`: `destinationFile`, `success`
/// - `move-file`: `newFile`, `success`
/// - `delete-file`: `success`
/// - `run-command`: `output`, `exitCode`, `success`
/// - `alert`: none
pub async fn execute(
    step_type: &str,
    config: &Map<String, Value>,
    outbound: &OutboundHandle,
) -> Result<Map<String, Value>, StepError> {
    match step_type {
        "copy-file" => copy_file(config).await,
        "move-file" => move_file(config).await,
        "delete-file" => delete_file(config).await,
        "run-command" => run_command(config).await,
        "alert" => alert(config, outbound),
        other => Err(StepError::NotImplemented(other.to_string())),
    }
}

fn require_str<'a>(
    config: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, StepError> {
    match config.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None => Err(StepError::MissingField(field)),
        Some(_) => Err(StepError::InvalidField { field, expected: "a string" }),
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StepError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|source| {
            StepError::FileOperation {
                operation: "create parent directory",
                path: parent.display().to_string(),
                source,
            }
        })?;
    }
    Ok(())
}

async fn copy_file(config: &Map<String, Value>) -> Result<Map<String, Value>, StepError> {
    let source = require_str(config, "source")?;
    let destination = require_str(config, "destination")?;
    ensure_parent(Path::new(destination)).await?;
    tokio::fs::copy(source, destination).await.map_err(|source_err| {
        StepError::FileOperation {
            operation: "copy",
            path: source.to_string(),
            source: source_err,
        }
    })?;
    let mut outputs = Map::new();
    outputs.insert("destinationFile".to_string(), json!(destination));
    outputs.insert("success".to_string(), json!(true));
    Ok(outputs)
}

async fn move_file(config: &Map<String, Value>) -> Result<Map<String, Value>, StepError> {
    let source = require_str(config, "source")?;
    let destination = require_str(config, "destination")?;
    ensure_parent(Path::new(destination)).await?;
    // Rename first; fall back to copy+remove across file systems.
    if tokio::fs::rename(source, destination).await.is_err() {
        tokio::fs::copy(source, destination).await.map_err(|e| StepError::FileOperation {
            operation: "move (copy)",
            path: source.to_string(),
            source: e,
        })?;
        tokio::fs::remove_file(source).await.map_err(|e| StepError::FileOperation {
            operation: "move (remove source)",
            path: source.to_string(),
            source: e,
        })?;
    }
    let mut outputs = Map::new();
    outputs.insert("newFile".to_string(), json!(destination));
    outputs.insert("success".to_string(), json!(true));
    Ok(outputs)
}

async fn delete_file(config: &Map<String, Value>) -> Result<Map<String, Value>, StepError> {
    let path = require_str(config, "path")?;
    tokio::fs::remove_file(path).await.map_err(|source| StepError::FileOperation {
        operation: "delete",
        path: path.to_string(),
        source,
    })?;
    let mut outputs = Map::new();
    outputs.insert("success".to_string(), json!(true));
    Ok(outputs)
}

async fn run_command(config: &Map<String, Value>) -> Result<Map<String, Value>, StepError> {
    let command = require_str(config, "command")?;
    let args: Vec<String> = match config.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            })
            .collect::<Result<_, StepError>>()?,
        Some(_) => {
            return Err(StepError::InvalidField { field: "args", expected: "an array" });
        }
    };

    // Bare command strings go through the shell; explicit args exec
    // directly.
    let mut cmd = if args.is_empty() {
        let mut sh = tokio::process::Command::new("sh");
        sh.arg("-c").arg(command);
        sh
    } else {
        let mut direct = tokio::process::Command::new(command);
        direct.args(&args);
        direct
    };

    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(StepError::Spawn)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let exit_code = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        return Err(StepError::CommandFailed { exit_code, output: combined.trim().to_string() });
    }

    let mut outputs = Map::new();
    outputs.insert("output".to_string(), json!(combined));
    outputs.insert("exitCode".to_string(), json!(exit_code));
    outputs.insert("success".to_string(), json!(true));
    Ok(outputs)
}

fn alert(
    config: &Map<String, Value>,
    outbound: &OutboundHandle,
) -> Result<Map<String, Value>, StepError> {
    let message = require_str(config, "message")?;
    let level = match config.get("level") {
        None | Some(Value::Null) => AlertLevel::Info,
        Some(Value::String(s)) => s
            .parse()
            .map_err(|_| StepError::InvalidField { field: "level", expected: "an alert level" })?,
        Some(_) => {
            return Err(StepError::InvalidField { field: "level", expected: "an alert level" });
        }
    };
    let details = config.get("details").and_then(Value::as_object).cloned();
    outbound.send_alert(level, message.to_string(), details);
    // Alert steps add nothing to context.
    Ok(Map::new())
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
