// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format tests: tagged JSON encoding of channel frames.

use super::*;
use convoy_core::{AgentId, AlertLevel, LogLevel};
use crate::message::Command;
use serde_json::json;

#[test]
fn heartbeat_encodes_with_type_tag() {
    let text = encode(&AgentMessage::Heartbeat { seq: None }).expect("encode failed");
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({"type": "heartbeat"}));
}

#[test]
fn registration_roundtrip() {
    let msg = AgentMessage::Registration {
        token: "T1".to_string(),
        public_key: "-----BEGIN PUBLIC KEY-----".to_string(),
        hostname: "h1".to_string(),
        platform: "linux/amd64".to_string(),
        api_port: Some(8088),
    };
    let back = decode_agent(&encode(&msg).unwrap()).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn reconnection_uses_camel_case_fields() {
    let msg = AgentMessage::Reconnection {
        agent_id: AgentId::new("A1"),
        timestamp_ms: 123,
        signature: "c2ln".to_string(),
        api_port: None,
    };
    let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
    assert_eq!(value["type"], "reconnection");
    assert_eq!(value["agentId"], "A1");
    assert_eq!(value["timestampMs"], 123);
}

#[test]
fn alert_roundtrip_with_details() {
    let details = match json!({"rule": "r7"}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let msg = AgentMessage::Alert {
        level: AlertLevel::Warning,
        message: "divergence".to_string(),
        details: Some(details),
    };
    let back = decode_agent(&encode(&msg).unwrap()).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn command_encodes_kebab_case_tag() {
    let msg = ControllerMessage::Command { command: Command::GitPull };
    let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
    assert_eq!(value, json!({"type": "command", "command": "git-pull"}));
}

#[test]
fn remove_workflow_carries_id() {
    let msg = ControllerMessage::Command {
        command: Command::RemoveWorkflow { workflow_id: "W2".to_string() },
    };
    let text = encode(&msg).unwrap();
    let back = decode_controller(&text).unwrap();
    assert_eq!(back, msg);
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["command"], "remove-workflow");
    assert_eq!(value["workflowId"], "W2");
}

#[test]
fn set_log_level_roundtrip() {
    let msg = ControllerMessage::Command {
        command: Command::SetLogLevel { level: LogLevel::Debug },
    };
    let back = decode_controller(&encode(&msg).unwrap()).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn registered_reply_roundtrip() {
    let msg = ControllerMessage::Registered { agent_id: AgentId::new("A1") };
    let back = decode_controller(&encode(&msg).unwrap()).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn malformed_frame_is_a_decode_error() {
    assert!(matches!(decode_agent("{not json"), Err(ProtocolError::Decode(_))));
    assert!(matches!(
        decode_agent(r#"{"type": "unheard-of"}"#),
        Err(ProtocolError::Decode(_))
    ));
}

#[test]
fn close_codes_are_distinct() {
    let codes = [
        CLOSE_MALFORMED,
        CLOSE_AUTH_FAILURE,
        CLOSE_LIVENESS_TIMEOUT,
        CLOSE_PREEMPTED,
    ];
    for (i, a) in codes.iter().enumerate() {
        for b in &codes[i + 1..] {
            assert_ne!(a, b);
        }
    }
}
