// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow execution engine.
//!
//! A run walks the step graph from the trigger's start steps: substitute
//! templates against the accumulated context, invoke the step, merge its
//! outputs, then enqueue successors: `next` on success, `onError` on
//! failure. A failed step with no error path ends the run as `failed`.
//! The visited set guards diamond joins; cycles were rejected at load.
//! Step evaluation inside one run is strictly sequential; runs are
//! concurrent with each other.

pub mod steps;

use crate::journal::{ExecutionRecord, ExecutionStatus};
use crate::outbound::OutboundHandle;
use convoy_core::{short, substitute_map, Clock, Context, ExecutionId, SystemClock, Workflow};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;

/// Currently-loaded workflow definitions, keyed by id.
#[derive(Default)]
pub struct WorkflowTable {
    inner: RwLock<HashMap<String, Workflow>>,
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table from a config document.
    ///
    /// Workflows failing validation are rejected with their named reason
    /// and do not unload the rest.
    pub fn reload(&self, workflows: &[Workflow]) -> Vec<(String, String)> {
        let mut accepted = HashMap::new();
        let mut rejected = Vec::new();
        for workflow in workflows {
            match workflow.validate() {
                Ok(()) => {
                    accepted.insert(workflow.id.clone(), workflow.clone());
                }
                Err(e) => {
                    tracing::warn!(workflow = %workflow.id, reason = %e, "workflow rejected at load");
                    rejected.push((workflow.id.clone(), e.to_string()));
                }
            }
        }
        *self.inner.write() = accepted;
        rejected
    }

    pub fn get(&self, id: &str) -> Option<Workflow> {
        self.inner.read().get(id).cloned()
    }

    /// Hook references (`WF:<name>`) resolve by human name, falling back
    /// to id.
    pub fn get_by_name(&self, name: &str) -> Option<Workflow> {
        let inner = self.inner.read();
        inner
            .values()
            .find(|w| w.name == name)
            .or_else(|| inner.get(name))
            .cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.inner.write().remove(id).is_some()
    }

    pub fn list(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self.inner.read().values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[derive(Clone)]
pub struct Executor {
    journal_tx: mpsc::Sender<ExecutionRecord>,
    outbound: OutboundHandle,
    clock: SystemClock,
}

impl Executor {
    pub fn new(journal_tx: mpsc::Sender<ExecutionRecord>, outbound: OutboundHandle) -> Self {
        Self { journal_tx, outbound, clock: SystemClock }
    }

    /// Run one workflow to a terminal status, journaling progress after
    /// every step.
    pub async fn execute(&self, workflow: &Workflow, initial: Context) -> ExecutionRecord {
        let mut record = ExecutionRecord {
            execution_id: ExecutionId::generate(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Running,
            started_at_ms: self.clock.epoch_ms(),
            finished_at_ms: None,
            context: initial.clone(),
            completed_steps: Vec::new(),
            error: None,
        };
        tracing::info!(
            workflow = %workflow.id,
            execution = %short(record.execution_id.as_str(), 8),
            "execution started"
        );
        self.journal(&record).await;

        let mut context = initial;
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> =
            workflow.start_step_ids().into_iter().map(str::to_string).collect();

        while let Some(step_id) = queue.pop_front() {
            if !visited.insert(step_id.clone()) {
                continue;
            }
            let Some(step) = workflow.step(&step_id) else {
                record.status = ExecutionStatus::Failed;
                record.error = Some(format!("step {step_id} is not defined"));
                break;
            };

            // Substitution happens immediately before invocation so
            // earlier outputs are visible here.
            let config = substitute_map(&step.config, &context);
            match steps::execute(&step.step_type, &config, &self.outbound).await {
                Ok(outputs) => {
                    context.merge(outputs);
                    record.completed_steps.push(step_id.clone());
                    record.context = context.clone();
                    queue.extend(step.next.iter().cloned());
                    tracing::debug!(workflow = %workflow.id, step = %step_id, "step completed");
                }
                Err(e) => {
                    tracing::warn!(workflow = %workflow.id, step = %step_id, error = %e, "step failed");
                    if step.on_error.is_empty() {
                        record.status = ExecutionStatus::Failed;
                        record.error = Some(format!("step {step_id}: {e}"));
                        break;
                    }
                    // The error path continues the run; the failed step
                    // itself is not recorded as completed.
                    queue.extend(step.on_error.iter().cloned());
                }
            }
            self.journal(&record).await;
        }

        if record.status == ExecutionStatus::Running {
            record.status = ExecutionStatus::Completed;
        }
        record.finished_at_ms = Some(self.clock.epoch_ms());
        self.journal(&record).await;
        tracing::info!(
            workflow = %workflow.id,
            execution = %short(record.execution_id.as_str(), 8),
            status = ?record.status,
            steps = record.completed_steps.len(),
            "execution finished"
        );
        record
    }

    async fn journal(&self, record: &ExecutionRecord) {
        if self.journal_tx.send(record.clone()).await.is_err() {
            tracing::error!(
                execution = %short(record.execution_id.as_str(), 8),
                "journal writer is gone"
            );
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
