// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::journal::Journal;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

struct Fixture {
    _dir: tempfile::TempDir,
    executor: Executor,
    workflows: Arc<WorkflowTable>,
    _writer: tokio::task::JoinHandle<()>,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path().join("state.json")).unwrap());
    let (journal_tx, writer) = crate::journal::spawn_writer(journal);
    let (outbound, _rx) = crate::outbound::OutboundHandle::detached();
    Fixture {
        _dir: dir,
        executor: Executor::new(journal_tx, outbound),
        workflows: Arc::new(WorkflowTable::new()),
        _writer: writer,
    }
}

fn file_context(name: &str) -> Context {
    let mut context = Context::new();
    context.insert("trigger", json!("filewatcher"));
    context.insert("fileName", json!(name));
    context
}

#[tokio::test]
async fn shell_hook_success() {
    let f = fixture();
    run_hook("true", &file_context("x.csv"), &f.executor, &f.workflows).await.unwrap();
}

#[tokio::test]
async fn shell_hook_substitutes_context() {
    let f = fixture();
    let dir = tempdir().unwrap();
    let marker = dir.path().join("marker");
    let command = format!("echo {{{{.fileName}}}} > {}", marker.display());

    run_hook(&command, &file_context("x.csv"), &f.executor, &f.workflows).await.unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "x.csv");
}

#[tokio::test]
async fn shell_hook_nonzero_exit_fails() {
    let f = fixture();
    let result = run_hook("exit 3", &file_context("x"), &f.executor, &f.workflows).await;
    assert!(matches!(result, Err(HookError::Shell { exit_code: 3, .. })));
}

#[tokio::test]
async fn workflow_hook_runs_by_name() {
    let f = fixture();
    let workflow: convoy_core::Workflow = serde_json::from_value(json!({
        "id": "W1",
        "name": "archive",
        "trigger": {"type": "filewatcher"},
        "steps": [{"id": "s1", "type": "run-command", "config": {"command": "true"}}]
    }))
    .unwrap();
    f.workflows.reload(&[workflow]);

    run_hook("WF:archive", &file_context("x.csv"), &f.executor, &f.workflows).await.unwrap();
}

#[tokio::test]
async fn workflow_hook_missing_workflow_fails() {
    let f = fixture();
    let result = run_hook("WF:ghost", &file_context("x"), &f.executor, &f.workflows).await;
    assert!(matches!(result, Err(HookError::WorkflowNotFound(name)) if name == "ghost"));
}

#[tokio::test]
async fn workflow_hook_failure_propagates() {
    let f = fixture();
    let workflow: convoy_core::Workflow = serde_json::from_value(json!({
        "id": "W2",
        "name": "broken",
        "trigger": {"type": "filewatcher"},
        "steps": [{"id": "s1", "type": "run-command", "config": {"command": "false"}}]
    }))
    .unwrap();
    f.workflows.reload(&[workflow]);

    let result = run_hook("WF:broken", &file_context("x"), &f.executor, &f.workflows).await;
    assert!(matches!(
        result,
        Err(HookError::WorkflowFailed { status: ExecutionStatus::Failed, .. })
    ));
}
