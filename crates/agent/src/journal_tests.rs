// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn record(id: &str, workflow: &str, status: ExecutionStatus) -> ExecutionRecord {
    ExecutionRecord {
        execution_id: ExecutionId::new(id),
        workflow_id: workflow.to_string(),
        status,
        started_at_ms: 1_000,
        finished_at_ms: None,
        context: Context::new(),
        completed_steps: vec![],
        error: None,
    }
}

#[test]
fn upsert_then_read_back_is_semantically_equal() {
    let dir = tempdir().unwrap();
    let journal = Journal::open(dir.path().join("state.json")).unwrap();

    let mut rec = record("e1", "W1", ExecutionStatus::Running);
    rec.context.insert("fileName", serde_json::json!("x.csv"));
    rec.completed_steps.push("copy".to_string());
    journal.upsert(rec.clone()).unwrap();

    let back = journal.get(&ExecutionId::new("e1")).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn upsert_replaces_by_execution_id() {
    let dir = tempdir().unwrap();
    let journal = Journal::open(dir.path().join("state.json")).unwrap();

    journal.upsert(record("e1", "W1", ExecutionStatus::Running)).unwrap();
    let mut done = record("e1", "W1", ExecutionStatus::Completed);
    done.finished_at_ms = Some(2_000);
    journal.upsert(done).unwrap();

    assert_eq!(journal.len(), 1);
    let back = journal.get(&ExecutionId::new("e1")).unwrap();
    assert_eq!(back.status, ExecutionStatus::Completed);
}

#[test]
fn journal_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let journal = Journal::open(path.clone()).unwrap();
        journal.upsert(record("e1", "W1", ExecutionStatus::Completed)).unwrap();
    }
    let journal = Journal::open(path).unwrap();
    assert_eq!(journal.len(), 1);
}

#[test]
fn startup_repair_reclassifies_running() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    {
        let journal = Journal::open(path.clone()).unwrap();
        journal.upsert(record("e1", "W1", ExecutionStatus::Running)).unwrap();
        journal.upsert(record("e2", "W1", ExecutionStatus::Completed)).unwrap();
    }
    let journal = Journal::open(path).unwrap();
    assert_eq!(journal.repair_interrupted().unwrap(), 1);

    let repaired = journal.get(&ExecutionId::new("e1")).unwrap();
    assert_eq!(repaired.status, ExecutionStatus::Failed);
    assert_eq!(repaired.error.as_deref(), Some("interrupted"));

    let untouched = journal.get(&ExecutionId::new("e2")).unwrap();
    assert_eq!(untouched.status, ExecutionStatus::Completed);
}

#[test]
fn list_is_newest_first_with_filter() {
    let dir = tempdir().unwrap();
    let journal = Journal::open(dir.path().join("state.json")).unwrap();
    journal.upsert(record("e1", "W1", ExecutionStatus::Completed)).unwrap();
    journal.upsert(record("e2", "W2", ExecutionStatus::Completed)).unwrap();
    journal.upsert(record("e3", "W1", ExecutionStatus::Failed)).unwrap();

    let all = journal.list(None);
    assert_eq!(all[0].execution_id, ExecutionId::new("e3"));
    assert_eq!(all.len(), 3);

    let w1 = journal.list(Some("W1"));
    assert_eq!(w1.len(), 2);
    assert!(w1.iter().all(|r| r.workflow_id == "W1"));
}

#[test]
fn terminal_statuses() {
    assert!(!ExecutionStatus::Running.is_terminal());
    assert!(ExecutionStatus::Completed.is_terminal());
    assert!(ExecutionStatus::Failed.is_terminal());
    assert!(ExecutionStatus::Cancelled.is_terminal());
}

#[tokio::test]
async fn writer_task_applies_updates_in_order() {
    let dir = tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path().join("state.json")).unwrap());
    let (tx, handle) = spawn_writer(Arc::clone(&journal));

    tx.send(record("e1", "W1", ExecutionStatus::Running)).await.unwrap();
    tx.send(record("e1", "W1", ExecutionStatus::Completed)).await.unwrap();
    drop(tx);
    handle.await.unwrap();

    assert_eq!(
        journal.get(&ExecutionId::new("e1")).unwrap().status,
        ExecutionStatus::Completed
    );
}
