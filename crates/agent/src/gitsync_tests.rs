// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! These tests exercise the real `git` binary against file-system
//! remotes; the signed HTTP headers are inert config for that transport.

use super::*;
use tempfile::tempdir;

fn git_in(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Create the "controller" repository with one committed file.
fn seed_remote(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git_in(dir, &["init"]);
    git_in(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git_in(dir, &["config", "user.name", "convoyd"]);
    git_in(dir, &["config", "user.email", "convoyd@localhost"]);
    git_in(dir, &["config", "receive.denyCurrentBranch", "updateInstead"]);
    std::fs::create_dir_all(dir.join("agents")).unwrap();
    std::fs::write(dir.join("agents/A1.json"), b"{\"workflows\": []}\n").unwrap();
    git_in(dir, &["add", "-A"]);
    git_in(dir, &["commit", "-m", "initialize config repository"]);
}

fn commit_remote_change(dir: &Path, content: &str) {
    std::fs::write(dir.join("agents/A1.json"), content.as_bytes()).unwrap();
    git_in(dir, &["add", "-A"]);
    git_in(dir, &["commit", "-m", "controller update"]);
}

struct Fixture {
    _dir: tempfile::TempDir,
    remote: PathBuf,
    sync: GitSync,
    repo: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let remote = dir.path().join("controller-repo");
    seed_remote(&remote);

    let (identity, _) = Identity::load_or_generate(&dir.path().join("agent_key")).unwrap();
    let repo = dir.path().join("config-repo");
    let sync = GitSync::new(
        repo.clone(),
        remote.display().to_string(),
        Arc::new(identity),
        AgentId::new("A1"),
        Duration::from_secs(10),
    );
    Fixture { _dir: dir, remote, sync, repo }
}

#[tokio::test]
async fn first_pull_clones() {
    let f = fixture();
    assert!(!f.sync.is_cloned());
    let outcome = f.sync.pull().await.unwrap();
    assert_eq!(outcome, PullOutcome::Cloned);
    assert!(f.sync.is_cloned());
    assert!(f.repo.join("agents/A1.json").exists());
}

#[tokio::test]
async fn clone_from_missing_remote_fails_cleanly() {
    let dir = tempdir().unwrap();
    let (identity, _) = Identity::load_or_generate(&dir.path().join("agent_key")).unwrap();
    let sync = GitSync::new(
        dir.path().join("config-repo"),
        dir.path().join("nope").display().to_string(),
        Arc::new(identity),
        AgentId::new("A1"),
        Duration::from_secs(10),
    );
    assert!(matches!(sync.ensure_clone().await, Err(GitSyncError::Command { .. })));
    // Retry is possible after registration completes.
    assert!(!sync.is_cloned());
}

#[tokio::test]
async fn pull_with_no_changes_is_up_to_date() {
    let f = fixture();
    f.sync.pull().await.unwrap();
    assert_eq!(f.sync.pull().await.unwrap(), PullOutcome::UpToDate);
}

#[tokio::test]
async fn pull_fast_forwards_remote_advance() {
    let f = fixture();
    f.sync.pull().await.unwrap();

    commit_remote_change(&f.remote, "{\"workflows\": [\"W2\"]}\n");
    let outcome = f.sync.pull().await.unwrap();
    assert_eq!(outcome, PullOutcome::FastForwarded);
    let content = std::fs::read_to_string(f.repo.join("agents/A1.json")).unwrap();
    assert!(content.contains("W2"));
}

#[tokio::test]
async fn divergence_parks_local_work_and_resets() {
    let f = fixture();
    f.sync.pull().await.unwrap();

    // Local edit (uncommitted: pull snapshots it) and remote edit.
    std::fs::write(f.repo.join("agents/A1.json"), b"{\"local\": true}\n").unwrap();
    commit_remote_change(&f.remote, "{\"remote\": true}\n");

    let outcome = f.sync.pull().await.unwrap();
    let PullOutcome::Diverged { backup_branch } = outcome else {
        panic!("expected divergence, got {outcome:?}");
    };
    assert!(backup_branch.starts_with("backup-"));

    // Tree now matches remote.
    let content = std::fs::read_to_string(f.repo.join("agents/A1.json")).unwrap();
    assert!(content.contains("remote"));

    // The backup is listable and recoverable by name.
    let backups = f.sync.list_backups().await.unwrap();
    assert_eq!(backups, vec![backup_branch.clone()]);

    let restored = f.sync.recover_backup("latest").await.unwrap();
    assert_eq!(restored, backup_branch);
    let content = std::fs::read_to_string(f.repo.join("agents/A1.json")).unwrap();
    assert!(content.contains("local"), "recovery restores local changes");
}

#[tokio::test]
async fn recover_unknown_backup_is_an_error() {
    let f = fixture();
    f.sync.pull().await.unwrap();
    assert!(matches!(
        f.sync.recover_backup("latest").await,
        Err(GitSyncError::NoBackups)
    ));
    assert!(matches!(
        f.sync.recover_backup("backup-19990101-000000").await,
        Err(GitSyncError::UnknownBackup(_))
    ));
}

#[tokio::test]
async fn check_changes_reports_dirty_tree() {
    let f = fixture();
    f.sync.pull().await.unwrap();
    assert!(f.sync.check_changes().await.unwrap().is_empty());

    std::fs::write(f.repo.join("agents/A1.json"), b"{\"edited\": 1}\n").unwrap();
    let changes = f.sync.check_changes().await.unwrap();
    assert!(changes.contains("agents/A1.json"));
}

#[tokio::test]
async fn push_lands_on_the_remote_working_tree() {
    let f = fixture();
    f.sync.pull().await.unwrap();

    std::fs::write(f.repo.join("agents/A1.json"), b"{\"pushed\": true}\n").unwrap();
    f.sync.push().await.unwrap();

    // receive.denyCurrentBranch=updateInstead updated the remote tree.
    let remote_content = std::fs::read_to_string(f.remote.join("agents/A1.json")).unwrap();
    assert!(remote_content.contains("pushed"));
}

#[tokio::test]
async fn merge_backup_brings_changes_back() {
    let f = fixture();
    f.sync.pull().await.unwrap();

    // Diverge on a *different* file so the merge is conflict-free.
    std::fs::write(f.repo.join("agents/local-note.json"), b"{\"note\": 1}\n").unwrap();
    commit_remote_change(&f.remote, "{\"remote\": 2}\n");
    let PullOutcome::Diverged { backup_branch } = f.sync.pull().await.unwrap() else {
        panic!("expected divergence");
    };

    f.sync.merge_backup(&backup_branch).await.unwrap();
    assert!(f.repo.join("agents/local-note.json").exists());
    let content = std::fs::read_to_string(f.repo.join("agents/A1.json")).unwrap();
    assert!(content.contains("remote"), "remote content preserved by merge");
}
