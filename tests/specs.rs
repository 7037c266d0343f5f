// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level binary specs.
//!
//! Exercise the two shipped binaries through their CLI surfaces: help
//! and version output, exit codes for the agent's one-shot Git verbs,
//! and the local-settings file the agent persists.

use assert_cmd::Command;
use serial_test::serial;
use tempfile::tempdir;

fn agent() -> Command {
    Command::cargo_bin("convoy-agent").expect("convoy-agent binary builds")
}

fn controller() -> Command {
    Command::cargo_bin("convoyd").expect("convoyd binary builds")
}

#[test]
fn agent_help_lists_the_maintenance_verbs() {
    let assert = agent().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for flag in [
        "--data-dir",
        "--controller-url",
        "--token",
        "--log-level",
        "--standalone",
        "--push-config",
        "--check-changes",
        "--list-backups",
        "--recover-backup",
        "--merge-config",
    ] {
        assert!(stdout.contains(flag), "help is missing {flag}\n{stdout}");
    }
}

#[test]
fn agent_version_prints() {
    agent().arg("--version").assert().success();
}

#[test]
fn controller_help_lists_listen_addresses() {
    let assert = controller().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("--hub-addr"));
    assert!(stdout.contains("--http-addr"));
    assert!(stdout.contains("--state-dir"));
}

#[test]
fn controller_version_prints() {
    controller().arg("--version").assert().success();
}

#[test]
#[serial]
fn unregistered_one_shot_fails_with_nonzero_exit() {
    let dir = tempdir().unwrap();
    let assert = agent()
        .args(["--data-dir", dir.path().to_str().unwrap(), "--check-changes"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("not registered"), "stderr: {stderr}");
}

#[test]
#[serial]
fn controller_url_flags_persist_into_local_settings() {
    let dir = tempdir().unwrap();
    // The one-shot fails (no registration), but the settings write
    // happens first.
    agent()
        .args([
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--controller-url",
            "ws://ctrl:7770",
            "--controller-api-url",
            "http://ctrl:7780",
            "--check-changes",
        ])
        .assert()
        .failure();

    let settings: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("config.json")).unwrap()).unwrap();
    assert_eq!(settings["controllerWsUrl"], "ws://ctrl:7770");
    assert_eq!(settings["controllerHttpUrl"], "http://ctrl:7780");
    assert!(settings["agentId"].is_null(), "id is only assigned by the controller");
}

#[test]
fn unknown_flag_is_rejected() {
    agent().arg("--definitely-not-a-flag").assert().failure();
    controller().arg("--definitely-not-a-flag").assert().failure();
}
