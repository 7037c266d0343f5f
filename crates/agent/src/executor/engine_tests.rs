// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::journal::Journal;
use convoy_core::{Step, Trigger};
use convoy_wire::AgentMessage;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

struct Harness {
    _dir: tempfile::TempDir,
    journal: Arc<Journal>,
    executor: Executor,
    alerts: tokio::sync::mpsc::Receiver<AgentMessage>,
    writer: tokio::task::JoinHandle<()>,
    journal_tx: tokio::sync::mpsc::Sender<crate::journal::ExecutionRecord>,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path().join("state.json")).unwrap());
    let (journal_tx, writer) = crate::journal::spawn_writer(Arc::clone(&journal));
    let (outbound, alerts) = crate::outbound::OutboundHandle::detached();
    let executor = Executor::new(journal_tx.clone(), outbound);
    Harness { _dir: dir, journal, executor, alerts, writer, journal_tx }
}

impl Harness {
    /// Let the writer drain, then return the journal.
    async fn settle(self) -> (Arc<Journal>, tokio::sync::mpsc::Receiver<AgentMessage>) {
        drop(self.executor);
        drop(self.journal_tx);
        self.writer.await.unwrap();
        (self.journal, self.alerts)
    }
}

fn step(id: &str, step_type: &str, config: serde_json::Value, next: &[&str], on_error: &[&str]) -> Step {
    let config = match config {
        serde_json::Value::Object(map) => map,
        _ => panic!("config must be an object"),
    };
    Step {
        id: id.to_string(),
        step_type: step_type.to_string(),
        name: String::new(),
        config,
        next: next.iter().map(|s| s.to_string()).collect(),
        on_error: on_error.iter().map(|s| s.to_string()).collect(),
    }
}

fn workflow(id: &str, steps: Vec<Step>) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        enabled: true,
        trigger: Trigger::Manual,
        start_steps: None,
        steps,
    }
}

fn file_context(dir: &std::path::Path, name: &str) -> Context {
    let mut context = Context::new();
    context.insert("trigger", json!("file"));
    context.insert("filePath", json!(dir.join(name).to_str().unwrap()));
    context.insert("fileName", json!(name));
    context
}

#[tokio::test]
async fn file_trigger_copy_then_alert_completes() {
    let h = harness();
    let data = tempdir().unwrap();
    std::fs::write(data.path().join("x.csv"), b"1,2\n").unwrap();
    let backup = data.path().join("backup");

    let wf = workflow(
        "W1",
        vec![
            step(
                "copy",
                "copy-file",
                json!({
                    "source": "{{.filePath}}",
                    "destination": format!("{}/{{{{.fileName}}}}", backup.display()),
                }),
                &["notify"],
                &[],
            ),
            step(
                "notify",
                "alert",
                json!({"level": "info", "message": "Backed up: {{.fileName}}"}),
                &[],
                &[],
            ),
        ],
    );

    let record = h.executor.execute(&wf, file_context(data.path(), "x.csv")).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.completed_steps, vec!["copy", "notify"]);
    assert_eq!(record.context.get("fileName"), Some(&json!("x.csv")));
    assert!(backup.join("x.csv").exists());

    let (journal, mut alerts) = h.settle().await;
    let stored = journal.list(Some("W1"));
    assert_eq!(stored[0].status, ExecutionStatus::Completed);

    match alerts.try_recv().unwrap() {
        AgentMessage::Alert { message, .. } => assert_eq!(message, "Backed up: x.csv"),
        other => panic!("expected alert, got {other:?}"),
    }
}

#[tokio::test]
async fn on_error_branch_completes_the_run() {
    let h = harness();
    let wf = workflow(
        "W5",
        vec![
            step("cmd", "run-command", json!({"command": "false"}), &[], &["notify-fail"]),
            step("notify-fail", "alert", json!({"message": "command failed"}), &[], &[]),
        ],
    );

    let record = h.executor.execute(&wf, Context::new()).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert!(record.completed_steps.contains(&"notify-fail".to_string()));
    assert!(!record.completed_steps.contains(&"cmd".to_string()));

    let (_, mut alerts) = h.settle().await;
    assert!(matches!(alerts.try_recv().unwrap(), AgentMessage::Alert { .. }));
}

#[tokio::test]
async fn failure_without_error_path_fails_with_first_error() {
    let h = harness();
    let wf = workflow(
        "W6",
        vec![
            step("boom", "run-command", json!({"command": "false"}), &["after"], &[]),
            step("after", "alert", json!({"message": "unreachable"}), &[], &[]),
        ],
    );

    let record = h.executor.execute(&wf, Context::new()).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.as_deref().unwrap().starts_with("step boom:"));
    assert!(record.completed_steps.is_empty());
}

#[tokio::test]
async fn unknown_step_type_fails_without_side_effects() {
    let h = harness();
    let wf = workflow("W7", vec![step("odd", "quantum-copy", json!({}), &[], &[])]);
    let record = h.executor.execute(&wf, Context::new()).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("not implemented"));
}

#[tokio::test]
async fn diamond_join_runs_shared_step_once() {
    let h = harness();
    let dir = tempdir().unwrap();
    let target = dir.path().join("once.txt");
    // Appending twice would duplicate the line; the visited set prevents it.
    let wf = workflow(
        "W8",
        vec![
            step("fan", "run-command", json!({"command": "true"}), &["left", "right"], &[]),
            step("left", "run-command", json!({"command": "true"}), &["join"], &[]),
            step("right", "run-command", json!({"command": "true"}), &["join"], &[]),
            step(
                "join",
                "run-command",
                json!({"command": format!("echo done >> {}", target.display())}),
                &[],
                &[],
            ),
        ],
    );

    let record = h.executor.execute(&wf, Context::new()).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    let content = std::fs::read_to_string(&target).unwrap();
    assert_eq!(content.matches("done").count(), 1);
    assert_eq!(record.completed_steps.iter().filter(|s| *s == "join").count(), 1);
}

#[tokio::test]
async fn later_steps_see_earlier_outputs() {
    let h = harness();
    let wf = workflow(
        "W9",
        vec![
            step("first", "run-command", json!({"command": "echo marker-42"}), &["second"], &[]),
            step("second", "alert", json!({"message": "got: {{.output}}"}), &[], &[]),
        ],
    );

    let record = h.executor.execute(&wf, Context::new()).await;
    assert_eq!(record.status, ExecutionStatus::Completed);

    let (_, mut alerts) = h.settle().await;
    match alerts.try_recv().unwrap() {
        AgentMessage::Alert { message, .. } => assert!(message.contains("marker-42")),
        other => panic!("expected alert, got {other:?}"),
    }
}

#[tokio::test]
async fn completed_steps_never_exceed_workflow_steps() {
    let h = harness();
    let wf = workflow(
        "W10",
        vec![
            step("a", "run-command", json!({"command": "true"}), &["b"], &[]),
            step("b", "run-command", json!({"command": "true"}), &[], &[]),
        ],
    );
    let record = h.executor.execute(&wf, Context::new()).await;
    assert!(record.completed_steps.len() <= wf.steps.len());
}

#[test]
fn table_reload_rejects_invalid_and_keeps_valid() {
    let table = WorkflowTable::new();
    let good = workflow("ok", vec![step("a", "run-command", json!({"command": "true"}), &[], &[])]);
    let mut cyclic = workflow(
        "bad",
        vec![
            step("a", "run-command", json!({}), &["b"], &[]),
            step("b", "run-command", json!({}), &["a"], &[]),
        ],
    );
    cyclic.name = "cyclic".to_string();

    let rejected = table.reload(&[good, cyclic]);
    assert_eq!(table.len(), 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, "bad");
    assert!(rejected[0].1.contains("cycle"));
}

#[test]
fn table_lookup_by_name_and_id() {
    let table = WorkflowTable::new();
    let mut wf = workflow("W1", vec![step("a", "run-command", json!({"command": "true"}), &[], &[])]);
    wf.name = "nightly cleanup".to_string();
    table.reload(&[wf]);

    assert!(table.get("W1").is_some());
    assert!(table.get_by_name("nightly cleanup").is_some());
    assert!(table.get_by_name("W1").is_some(), "falls back to id");
    assert!(table.get_by_name("nope").is_none());

    assert!(table.remove("W1"));
    assert!(table.is_empty());
}
