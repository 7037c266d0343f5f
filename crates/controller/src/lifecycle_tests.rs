// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config::load(
        Some(dir.path().join("state")),
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:0".parse().unwrap(),
    )
    .unwrap()
}

#[test]
fn config_paths_hang_off_state_dir() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    assert!(config.registry_path.starts_with(&config.state_dir));
    assert!(config.repo_dir.starts_with(&config.state_dir));
    assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(config.git_timeout, Duration::from_secs(10));
}

#[tokio::test]
async fn startup_initializes_everything() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let state = startup(config).await.unwrap();
    assert!(state.config.repo_dir.join(".git").exists());
    assert_eq!(state.app_state.registry.list().len(), 0);
    assert!(!state.hub.is_connected(&convoy_core::AgentId::new("A1")));
}

#[tokio::test]
async fn second_instance_is_refused() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let _first = startup(config.clone()).await.unwrap();
    let second = startup(config).await;
    assert!(matches!(second, Err(LifecycleError::AlreadyRunning(_))));
}
