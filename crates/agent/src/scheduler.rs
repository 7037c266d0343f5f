// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interval scheduler for `schedule`-triggered workflows.
//!
//! One timer task per enabled schedule workflow; each tick runs the
//! workflow with a schedule context. Interval timing only; calendar
//! cron expressions are a known limitation of the first cut.

use crate::executor::Executor;
use convoy_core::{Clock, Context, SystemClock, Trigger, Workflow};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    pub scheduled: usize,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Start timers for every enabled schedule workflow.
///
/// Rebuilt wholesale on config reload: stop the old handle, call again.
pub fn spawn(
    workflows: &[Workflow],
    executor: Executor,
    parent_cancel: &CancellationToken,
) -> SchedulerHandle {
    let cancel = parent_cancel.child_token();
    let mut tasks = Vec::new();

    for workflow in workflows {
        let Trigger::Schedule { interval_seconds } = workflow.trigger else { continue };
        if !workflow.enabled {
            continue;
        }
        let interval = Duration::from_secs(interval_seconds.max(1));
        tracing::info!(workflow = %workflow.id, interval_secs = interval.as_secs(), "schedule armed");
        tasks.push(tokio::spawn(run_schedule(
            workflow.clone(),
            interval,
            executor.clone(),
            cancel.clone(),
        )));
    }

    SchedulerHandle { cancel, scheduled: tasks.len(), tasks }
}

async fn run_schedule(
    workflow: Workflow,
    interval: Duration,
    executor: Executor,
    cancel: CancellationToken,
) {
    let clock = SystemClock;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so the workflow runs
    // one interval after arming.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mut context = Context::new();
                context.insert("trigger", json!("schedule"));
                context.insert("timestamp", json!(clock.epoch_ms()));
                context.insert(
                    "scheduledTime",
                    json!(chrono::Local::now().to_rfc3339()),
                );
                executor.execute(&workflow, context).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
