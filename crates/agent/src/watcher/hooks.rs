// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External-program hooks around the operation sequence.
//!
//! A hook field is either a shell invocation (templated against the file
//! context) or a `WF:<name>` workflow reference. Workflow hooks run
//! synchronously through the executor with the file-trigger context; the
//! hook fails unless the execution completes.

use crate::executor::{Executor, WorkflowTable};
use crate::journal::ExecutionStatus;
use convoy_core::{substitute_string, Context, HookKind};
use std::process::Stdio;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook command exited with {exit_code}: {stderr}")]
    Shell { exit_code: i32, stderr: String },

    #[error("hook command could not be spawned: {0}")]
    Spawn(std::io::Error),

    #[error("hook workflow `{0}` is not loaded")]
    WorkflowNotFound(String),

    #[error("hook workflow `{name}` ended {status:?}: {error}")]
    WorkflowFailed { name: String, status: ExecutionStatus, error: String },
}

pub async fn run_hook(
    raw: &str,
    context: &Context,
    executor: &Executor,
    workflows: &WorkflowTable,
) -> Result<(), HookError> {
    match HookKind::parse(raw) {
        HookKind::Shell(command) => run_shell(&command, context).await,
        HookKind::Workflow(name) => run_workflow(&name, context, executor, workflows).await,
    }
}

async fn run_shell(command: &str, context: &Context) -> Result<(), HookError> {
    let command = substitute_string(command, context);
    tracing::debug!(%command, "running shell hook");
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(HookError::Spawn)?;

    if !output.status.success() {
        return Err(HookError::Shell {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn run_workflow(
    name: &str,
    context: &Context,
    executor: &Executor,
    workflows: &WorkflowTable,
) -> Result<(), HookError> {
    let workflow = workflows
        .get_by_name(name)
        .ok_or_else(|| HookError::WorkflowNotFound(name.to_string()))?;
    let record = executor.execute(&workflow, context.clone()).await;
    if record.status == ExecutionStatus::Completed {
        Ok(())
    } else {
        Err(HookError::WorkflowFailed {
            name: name.to_string(),
            status: record.status,
            error: record.error.unwrap_or_else(|| "no error recorded".to_string()),
        })
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
