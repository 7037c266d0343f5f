// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn step(id: &str, next: &[&str], on_error: &[&str]) -> Step {
    Step {
        id: id.to_string(),
        step_type: "run-command".to_string(),
        name: String::new(),
        config: Map::new(),
        next: next.iter().map(|s| s.to_string()).collect(),
        on_error: on_error.iter().map(|s| s.to_string()).collect(),
    }
}

fn workflow(steps: Vec<Step>) -> Workflow {
    Workflow {
        id: "W1".to_string(),
        name: "test".to_string(),
        description: String::new(),
        enabled: true,
        trigger: Trigger::Manual,
        start_steps: None,
        steps,
    }
}

#[test]
fn linear_chain_is_valid() {
    let wf = workflow(vec![step("a", &["b"], &[]), step("b", &[], &[])]);
    assert_eq!(wf.validate(), Ok(()));
}

#[test]
fn empty_workflow_rejected() {
    let wf = workflow(vec![]);
    assert!(matches!(wf.validate(), Err(WorkflowError::Empty { .. })));
}

#[test]
fn duplicate_step_id_rejected() {
    let wf = workflow(vec![step("a", &[], &[]), step("a", &[], &[])]);
    assert!(matches!(
        wf.validate(),
        Err(WorkflowError::DuplicateStepId { step, .. }) if step == "a"
    ));
}

#[test]
fn dangling_reference_rejected() {
    let wf = workflow(vec![step("a", &["ghost"], &[])]);
    assert!(matches!(
        wf.validate(),
        Err(WorkflowError::UnknownReference { target, .. }) if target == "ghost"
    ));
}

#[test]
fn two_step_cycle_rejected_with_named_error() {
    let wf = workflow(vec![step("a", &["b"], &[]), step("b", &["a"], &[])]);
    assert!(matches!(wf.validate(), Err(WorkflowError::Cycle { .. })));
}

#[test]
fn self_loop_rejected() {
    let wf = workflow(vec![step("a", &["a"], &[])]);
    assert!(matches!(wf.validate(), Err(WorkflowError::Cycle { .. })));
}

#[test]
fn cycle_through_error_path_rejected() {
    let wf = workflow(vec![step("a", &["b"], &[]), step("b", &[], &["a"])]);
    assert!(matches!(wf.validate(), Err(WorkflowError::Cycle { .. })));
}

#[test]
fn diamond_join_is_acyclic() {
    // a -> b, a -> c, b -> d, c -> d: d is reached twice but no cycle.
    let wf = workflow(vec![
        step("a", &["b", "c"], &[]),
        step("b", &["d"], &[]),
        step("c", &["d"], &[]),
        step("d", &[], &[]),
    ]);
    assert_eq!(wf.validate(), Ok(()));
}

#[test]
fn webhook_trigger_rejected_as_reserved() {
    let mut wf = workflow(vec![step("a", &[], &[])]);
    wf.trigger = Trigger::Webhook;
    assert!(matches!(
        wf.validate(),
        Err(WorkflowError::WebhookReserved { .. })
    ));
}

#[test]
fn unknown_start_step_rejected() {
    let mut wf = workflow(vec![step("a", &[], &[])]);
    wf.start_steps = Some(vec!["zzz".to_string()]);
    assert!(matches!(
        wf.validate(),
        Err(WorkflowError::UnknownStartStep { .. })
    ));
}

#[test]
fn start_steps_default_to_first_step() {
    let wf = workflow(vec![step("first", &[], &[]), step("second", &[], &[])]);
    assert_eq!(wf.start_step_ids(), vec!["first"]);
}

#[test]
fn explicit_start_steps_win() {
    let mut wf = workflow(vec![step("a", &[], &[]), step("b", &[], &[])]);
    wf.start_steps = Some(vec!["b".to_string()]);
    assert_eq!(wf.start_step_ids(), vec!["b"]);
}

#[test]
fn deserializes_editor_shaped_json() {
    let wf: Workflow = serde_json::from_value(json!({
        "id": "W2",
        "name": "Backup inbound",
        "trigger": {"type": "file", "path": "/data/in"},
        "steps": [
            {
                "id": "copy",
                "type": "copy-file",
                "config": {"source": "{{.filePath}}", "destination": "/data/backup/{{.fileName}}"},
                "next": ["notify"]
            },
            {
                "id": "notify",
                "type": "alert",
                "config": {"level": "info", "message": "Backed up: {{.fileName}}"}
            }
        ]
    }))
    .unwrap();
    assert_eq!(wf.validate(), Ok(()));
    assert!(wf.enabled, "enabled defaults to true");
    assert_eq!(wf.trigger.kind(), "file");
    assert_eq!(wf.start_step_ids(), vec!["copy"]);
    assert_eq!(wf.step("notify").unwrap().step_type, "alert");
}

#[test]
fn schedule_trigger_roundtrips() {
    let trigger = Trigger::Schedule { interval_seconds: 300 };
    let json = serde_json::to_value(&trigger).unwrap();
    assert_eq!(json, json!({"type": "schedule", "intervalSeconds": 300}));
    let back: Trigger = serde_json::from_value(json).unwrap();
    assert_eq!(back, trigger);
}
