// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-file processing pipeline, stages that run after dispatch:
//! in-use probing with retries, time-window deferral, the settle delay,
//! the before hook, the operation sequence, and the after hook. Any
//! failure runs the on-error hook, terminates the pipeline for that
//! file, and raises an alert.

use crate::executor::{Executor, WorkflowTable};
use crate::outbound::OutboundHandle;
use crate::watcher::{hooks, ops};
use chrono::Local;
use convoy_core::{AlertLevel, Clock, Context, SystemClock, WatcherRule};
use fs2::FileExt;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the pipeline needs besides the rule and file.
#[derive(Clone)]
pub struct PipelineDeps {
    pub executor: Executor,
    pub workflows: Arc<WorkflowTable>,
    pub outbound: OutboundHandle,
}

/// Sleep unless cancelled; false means cancellation won.
pub(crate) async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

enum PipelineEnd {
    Cancelled,
    Failed(String),
}

/// Run the full pipeline for one dispatched file.
pub async fn process_file(
    deps: &PipelineDeps,
    rule: &WatcherRule,
    path: &Path,
    event: &str,
    cancel: &CancellationToken,
) {
    match run(deps, rule, path, event, cancel).await {
        Ok(()) => {
            tracing::info!(rule = %rule.id, path = %path.display(), "file processed");
        }
        Err(PipelineEnd::Cancelled) => {}
        Err(PipelineEnd::Failed(reason)) => {
            tracing::warn!(rule = %rule.id, path = %path.display(), %reason, "pipeline failed");
            if let Some(on_error) = &rule.hooks.on_error {
                let context = file_context(rule, path, event);
                if let Err(e) =
                    hooks::run_hook(on_error, &context, &deps.executor, &deps.workflows).await
                {
                    tracing::error!(rule = %rule.id, error = %e, "on-error hook failed");
                }
            }
            let mut details = Map::new();
            details.insert("rule".to_string(), json!(rule.id));
            details.insert("path".to_string(), json!(path.display().to_string()));
            deps.outbound.send_alert(
                AlertLevel::Error,
                format!("file rule {} failed: {reason}", rule.id),
                Some(details),
            );
        }
    }
}

async fn run(
    deps: &PipelineDeps,
    rule: &WatcherRule,
    path: &Path,
    event: &str,
    cancel: &CancellationToken,
) -> Result<(), PipelineEnd> {
    // In-use probe with bounded retries.
    if rule.processing.check_in_use {
        let mut attempt = 0;
        while file_in_use(path) {
            attempt += 1;
            if attempt > rule.processing.max_retries {
                return Err(PipelineEnd::Failed(format!(
                    "file still in use after {} attempts",
                    rule.processing.max_retries
                )));
            }
            tracing::debug!(rule = %rule.id, path = %path.display(), attempt, "file in use, retrying");
            let delay = Duration::from_secs(rule.processing.retry_delay_secs);
            if !sleep_cancellable(delay, cancel).await {
                return Err(PipelineEnd::Cancelled);
            }
        }
    }

    // Clock-of-day and day-of-week admission, deferred when closed.
    let now = Local::now().naive_local();
    match rule.time_restrictions.seconds_until_admitted(now) {
        Some(0) => {}
        Some(wait) => {
            tracing::info!(rule = %rule.id, wait, "deferring to the next admitting instant");
            if !sleep_cancellable(Duration::from_secs(wait), cancel).await {
                return Err(PipelineEnd::Cancelled);
            }
        }
        None => {
            return Err(PipelineEnd::Failed("time restrictions never admit".to_string()));
        }
    }

    // Settle delay for upstream writers.
    if rule.time_restrictions.process_after_secs > 0 {
        let delay = Duration::from_secs(rule.time_restrictions.process_after_secs);
        if !sleep_cancellable(delay, cancel).await {
            return Err(PipelineEnd::Cancelled);
        }
    }

    let context = file_context(rule, path, event);

    if let Some(before) = &rule.hooks.before {
        hooks::run_hook(before, &context, &deps.executor, &deps.workflows)
            .await
            .map_err(|e| PipelineEnd::Failed(format!("before hook: {e}")))?;
    }

    ops::apply(&rule.operations, path)
        .await
        .map_err(|e| PipelineEnd::Failed(e.to_string()))?;

    if let Some(after) = &rule.hooks.after {
        hooks::run_hook(after, &context, &deps.executor, &deps.workflows)
            .await
            .map_err(|e| PipelineEnd::Failed(format!("after hook: {e}")))?;
    }

    Ok(())
}

/// Trigger context handed to hooks and hook workflows.
fn file_context(rule: &WatcherRule, path: &Path, event: &str) -> Context {
    let mut context = Context::new();
    context.insert("trigger", json!("filewatcher"));
    context.insert("rule", json!(rule.id));
    context.insert("file", json!(path.display().to_string()));
    context.insert("filePath", json!(path.display().to_string()));
    context.insert(
        "fileName",
        json!(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()),
    );
    context.insert(
        "directory",
        json!(path.parent().map(|p| p.display().to_string()).unwrap_or_default()),
    );
    context.insert("event", json!(event));
    context.insert("timestamp", Value::from(SystemClock.epoch_ms()));
    context
}

/// Probe for exclusive access; a held lock or open handle means in use.
fn file_in_use(path: &Path) -> bool {
    match std::fs::File::open(path) {
        Ok(file) => {
            if file.try_lock_exclusive().is_err() {
                return true;
            }
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        // Vanished between dispatch and probe; let the operations report it.
        Err(_) => false,
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
