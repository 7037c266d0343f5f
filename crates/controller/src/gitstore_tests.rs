// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! These tests drive the real `git` binary against temp repositories.

use super::*;
use convoy_core::Trigger;
use serde_json::json;
use tempfile::tempdir;

fn store(dir: &tempfile::TempDir) -> ConfigStore {
    ConfigStore::new(dir.path().join("config-repo"), Duration::from_secs(10))
}

fn sample_workflow(id: &str) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: format!("workflow {id}"),
        description: String::new(),
        enabled: true,
        trigger: Trigger::Manual,
        start_steps: None,
        steps: vec![convoy_core::Step {
            id: "s1".to_string(),
            step_type: "run-command".to_string(),
            name: String::new(),
            config: serde_json::Map::new(),
            next: vec![],
            on_error: vec![],
        }],
    }
}

#[tokio::test]
async fn init_creates_repo_with_layout() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();

    assert!(s.repo_dir().join(".git").exists());
    assert!(s.repo_dir().join("agents").exists());
    assert!(s.repo_dir().join("workflows").exists());

    let deny = s.git(&["config", "receive.denyCurrentBranch"]).await.unwrap();
    assert_eq!(deny.trim(), "updateInstead");

    // Idempotent
    s.init().await.unwrap();
}

#[tokio::test]
async fn write_and_read_document_roundtrip() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();

    let doc = json!({"logSettings": {"level": "debug"}});
    s.write_document("agents/A1.json", &doc, "update A1").await.unwrap();
    let back = s.read_document("agents/A1.json").await.unwrap();
    assert_eq!(back, Some(doc));

    let log = s.git(&["log", "--oneline"]).await.unwrap();
    assert!(log.contains("update A1"));
}

#[tokio::test]
async fn write_without_changes_is_not_an_error() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();
    let doc = json!({"a": 1});
    s.write_document("agents/A1.json", &doc, "first").await.unwrap();
    s.write_document("agents/A1.json", &doc, "same again").await.unwrap();
}

#[tokio::test]
async fn missing_document_reads_as_none() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();
    assert_eq!(s.read_document("agents/ghost.json").await.unwrap(), None);
}

#[tokio::test]
async fn init_agent_config_writes_defaults_once() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();

    let id = AgentId::new("A1");
    let config = s.init_agent_config(&id).await.unwrap();
    assert_eq!(config, AgentConfig::default());
    assert!(s.repo_dir().join("agents/A1.json").exists());

    // Second call returns the stored document instead of overwriting.
    let again = s.init_agent_config(&id).await.unwrap();
    assert_eq!(again, config);
}

#[tokio::test]
async fn upsert_workflow_updates_both_documents() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();
    let id = AgentId::new("A1");
    s.init_agent_config(&id).await.unwrap();

    let wf = sample_workflow("W2");
    s.upsert_workflow(&id, &wf).await.unwrap();

    assert!(s.repo_dir().join("workflows/W2.json").exists());
    let agent_doc = s.read_document("agents/A1.json").await.unwrap().unwrap();
    let config: AgentConfig = serde_json::from_value(agent_doc).unwrap();
    assert_eq!(config.workflows.len(), 1);
    assert_eq!(config.workflows[0].id, "W2");

    // Re-deploying replaces rather than duplicates.
    s.upsert_workflow(&id, &wf).await.unwrap();
    let agent_doc = s.read_document("agents/A1.json").await.unwrap().unwrap();
    let config: AgentConfig = serde_json::from_value(agent_doc).unwrap();
    assert_eq!(config.workflows.len(), 1);
}

#[tokio::test]
async fn remove_workflow_cleans_both_documents() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();
    let id = AgentId::new("A1");
    s.init_agent_config(&id).await.unwrap();
    s.upsert_workflow(&id, &sample_workflow("W2")).await.unwrap();

    s.remove_workflow(&id, "W2").await.unwrap();
    assert!(!s.repo_dir().join("workflows/W2.json").exists());
    let config: AgentConfig =
        serde_json::from_value(s.read_document("agents/A1.json").await.unwrap().unwrap()).unwrap();
    assert!(config.workflows.is_empty());
}

#[tokio::test]
async fn sync_mirror_refreshes_registry() {
    let dir = tempdir().unwrap();
    let s = store(&dir);
    s.init().await.unwrap();

    let registry =
        crate::registry::Registry::open(dir.path().join("registry.json")).unwrap();
    registry
        .register(crate::registry::AgentRecord {
            id: AgentId::new("A1"),
            public_key: "pem".to_string(),
            hostname: "h1".to_string(),
            platform: "linux/amd64".to_string(),
            status: crate::registry::AgentStatus::Offline,
            last_heartbeat_ms: None,
            observed_ip: None,
            api_port: None,
            pinned_api_address: None,
            metadata: serde_json::Map::new(),
            config_mirror: None,
            registered_at_ms: 0,
        })
        .unwrap();

    let doc = json!({"logSettings": {"level": "warn"}});
    s.write_document("agents/A1.json", &doc, "push from agent").await.unwrap();

    let synced = s.sync_mirror(&registry).await.unwrap();
    assert_eq!(synced, 1);
    assert_eq!(registry.get(&AgentId::new("A1")).unwrap().config_mirror, Some(doc));
}
