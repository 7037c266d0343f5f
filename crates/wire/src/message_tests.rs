// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

#[parameterized(
    reload_config = { Command::ReloadConfig, "reload-config" },
    reload_filewatcher = { Command::ReloadFilewatcher, "reload-filewatcher" },
    git_pull = { Command::GitPull, "git-pull" },
    remove_workflow = { Command::RemoveWorkflow { workflow_id: "W1".to_string() }, "remove-workflow" },
    set_log_level = { Command::SetLogLevel { level: LogLevel::Info }, "set-log-level" },
)]
fn command_name_matches_wire_tag(command: Command, expected: &str) {
    assert_eq!(command.name(), expected);
    let value = serde_json::to_value(&command).unwrap();
    assert_eq!(value["command"], json!(expected));
}

#[test]
fn status_fields_are_free_form() {
    let fields = match json!({"condition": "git-divergence", "backupBranch": "backup-20260107-120000"}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let msg = AgentMessage::Status { fields };
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "status");
    assert_eq!(value["fields"]["condition"], "git-divergence");
}

#[test]
fn heartbeat_seq_is_optional_on_the_wire() {
    let msg: AgentMessage = serde_json::from_value(json!({"type": "heartbeat"})).unwrap();
    assert_eq!(msg, AgentMessage::Heartbeat { seq: None });

    let msg: AgentMessage =
        serde_json::from_value(json!({"type": "heartbeat", "seq": 9})).unwrap();
    assert_eq!(msg, AgentMessage::Heartbeat { seq: Some(9) });
}
