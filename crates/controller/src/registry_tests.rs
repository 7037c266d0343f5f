// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn record(id: &str) -> AgentRecord {
    AgentRecord {
        id: AgentId::new(id),
        public_key: "-----BEGIN PUBLIC KEY-----\nK1\n-----END PUBLIC KEY-----\n".to_string(),
        hostname: "h1".to_string(),
        platform: "linux/amd64".to_string(),
        status: AgentStatus::Online,
        last_heartbeat_ms: None,
        observed_ip: Some("10.0.0.5".to_string()),
        api_port: Some(8088),
        pinned_api_address: None,
        metadata: Map::new(),
        config_mirror: None,
        registered_at_ms: 1,
    }
}

#[test]
fn register_and_get() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    registry.register(record("A1")).unwrap();
    let got = registry.get(&AgentId::new("A1")).unwrap();
    assert_eq!(got.hostname, "h1");
    assert_eq!(got.status, AgentStatus::Online);
}

#[test]
fn persists_across_reopen_and_resets_online() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("registry.json");
    {
        let registry = Registry::open(path.clone()).unwrap();
        registry.register(record("A1")).unwrap();
    }
    let reopened = Registry::open(path).unwrap();
    let got = reopened.get(&AgentId::new("A1")).unwrap();
    // A reopened controller has no live sessions.
    assert_eq!(got.status, AgentStatus::Offline);
}

#[test]
fn touch_updates_heartbeat() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    registry.register(record("A1")).unwrap();
    registry.touch(&AgentId::new("A1"), 42_000).unwrap();
    assert_eq!(registry.get(&AgentId::new("A1")).unwrap().last_heartbeat_ms, Some(42_000));
}

#[test]
fn touch_unknown_agent_fails() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    assert!(matches!(
        registry.touch(&AgentId::new("ghost"), 1),
        Err(RegistryError::UnknownAgent(_))
    ));
}

#[test]
fn offline_transition() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    registry.register(record("A1")).unwrap();
    registry.mark_offline(&AgentId::new("A1")).unwrap();
    assert_eq!(registry.get(&AgentId::new("A1")).unwrap().status, AgentStatus::Offline);
}

#[test]
fn api_address_prefers_pinned() {
    let mut r = record("A1");
    assert_eq!(r.api_address().unwrap(), "10.0.0.5:8088");
    r.pinned_api_address = Some("agent1.internal:9000".to_string());
    assert_eq!(r.api_address().unwrap(), "agent1.internal:9000");
}

#[test]
fn api_address_defaults_port() {
    let mut r = record("A1");
    r.api_port = None;
    assert_eq!(r.api_address().unwrap(), "10.0.0.5:8088");
    r.observed_ip = None;
    assert_eq!(r.api_address(), None);
}

#[test]
fn config_mirror_updates() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    registry.register(record("A1")).unwrap();
    let doc = serde_json::json!({"logSettings": {"level": "debug"}});
    registry.set_config_mirror(&AgentId::new("A1"), doc.clone()).unwrap();
    assert_eq!(registry.get(&AgentId::new("A1")).unwrap().config_mirror, Some(doc));
}

#[test]
fn list_sorted_by_registration() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    let mut b = record("B");
    b.registered_at_ms = 10;
    let mut a = record("A");
    a.registered_at_ms = 5;
    registry.register(b).unwrap();
    registry.register(a).unwrap();
    let ids: Vec<String> =
        registry.list().into_iter().map(|r| r.id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["A", "B"]);
}

#[test]
fn remove_is_explicit() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join("registry.json")).unwrap();
    registry.register(record("A1")).unwrap();
    registry.remove(&AgentId::new("A1")).unwrap();
    assert!(registry.get(&AgentId::new("A1")).is_none());
    assert!(matches!(
        registry.remove(&AgentId::new("A1")),
        Err(RegistryError::UnknownAgent(_))
    ));
}
