// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow execution journal (`state.json`).
//!
//! Every context mutation and status transition is flushed atomically
//! (temp-write then rename), so a crash never leaves a torn journal. A
//! single writer task owns mutation; other subsystems enqueue full
//! record snapshots. On startup, records stuck in `running` are
//! reclassified as interrupted; at-least-once semantics are what the
//! operator sees.

use convoy_core::fsjson::{self, PersistError};
use convoy_core::{Context, ExecutionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Once an execution leaves `running`, the status is terminal.
    pub fn is_terminal(self) -> bool {
        self != ExecutionStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    /// Trigger context, extended with step outputs as the run proceeds.
    pub context: Context,
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalState {
    executions: Vec<ExecutionRecord>,
}

/// Retained execution records; oldest are dropped past this.
const MAX_RECORDS: usize = 1000;

pub struct Journal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl Journal {
    pub fn open(path: PathBuf) -> Result<Self, PersistError> {
        let state = fsjson::load_json(&path)?.unwrap_or_default();
        Ok(Self { path, state: Mutex::new(state) })
    }

    /// Reclassify `running` records as failed/interrupted; returns how
    /// many were repaired.
    pub fn repair_interrupted(&self) -> Result<usize, PersistError> {
        let mut state = self.state.lock();
        let mut repaired = 0;
        for record in &mut state.executions {
            if record.status == ExecutionStatus::Running {
                record.status = ExecutionStatus::Failed;
                record.error = Some("interrupted".to_string());
                repaired += 1;
            }
        }
        if repaired > 0 {
            fsjson::save_json(&self.path, &*state)?;
        }
        Ok(repaired)
    }

    /// Insert or replace a record by execution id and flush.
    pub fn upsert(&self, record: ExecutionRecord) -> Result<(), PersistError> {
        let mut state = self.state.lock();
        match state
            .executions
            .iter_mut()
            .find(|r| r.execution_id == record.execution_id)
        {
            Some(existing) => *existing = record,
            None => state.executions.push(record),
        }
        if state.executions.len() > MAX_RECORDS {
            let excess = state.executions.len() - MAX_RECORDS;
            state.executions.drain(..excess);
        }
        fsjson::save_json(&self.path, &*state)
    }

    /// Newest first, optionally filtered by workflow.
    pub fn list(&self, workflow_id: Option<&str>) -> Vec<ExecutionRecord> {
        let state = self.state.lock();
        state
            .executions
            .iter()
            .rev()
            .filter(|r| workflow_id.is_none_or(|id| r.workflow_id == id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        self.state.lock().executions.iter().find(|r| &r.execution_id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().executions.is_empty()
    }

    /// Size of the journal file on disk, for `/metrics`.
    pub fn file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

/// Spawn the single writer task that owns journal mutation.
///
/// Subsystems send full-record snapshots; the task applies them in
/// arrival order. Returns the sender half.
pub fn spawn_writer(journal: Arc<Journal>) -> (mpsc::Sender<ExecutionRecord>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ExecutionRecord>(256);
    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = journal.upsert(record) {
                tracing::error!(error = %e, "journal write failed");
            }
        }
    });
    (tx, handle)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
