// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side Git synchronization of the config working tree.
//!
//! The working tree is a mirror, never authoritative. Pulls fast-forward
//! onto the controller's branch; when both sides have advanced, local
//! work is parked on a timestamped backup branch, the tree hard-resets
//! to remote, and the caller reports the divergence. No automatic
//! textual merges, ever. Network operations authenticate with signed
//! extra headers and are bounded by the Git timeout.

use crate::identity::Identity;
use convoy_core::{AgentId, Clock, SystemClock};
use convoy_wire::auth as wire_auth;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} timed out")]
    Timeout { args: String },

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("no backup branches exist")]
    NoBackups,

    #[error("unknown backup: {0}")]
    UnknownBackup(String),
}

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Fresh clone; nothing to reconcile.
    Cloned,
    /// Local tree already matched remote.
    UpToDate,
    /// Remote had advanced; local fast-forwarded cleanly.
    FastForwarded,
    /// Both sides had advanced; local commits parked on a backup branch
    /// and the tree reset to remote.
    Diverged { backup_branch: String },
}

pub struct GitSync {
    repo_dir: PathBuf,
    remote_url: String,
    identity: Arc<Identity>,
    agent_id: AgentId,
    timeout: Duration,
    clock: SystemClock,
}

impl GitSync {
    pub fn new(
        repo_dir: PathBuf,
        remote_url: String,
        identity: Arc<Identity>,
        agent_id: AgentId,
        timeout: Duration,
    ) -> Self {
        Self { repo_dir, remote_url, identity, agent_id, timeout, clock: SystemClock }
    }

    pub fn is_cloned(&self) -> bool {
        self.repo_dir.join(".git").exists()
    }

    /// Clone if the working tree does not exist yet.
    ///
    /// A fresh agent may race its own registration; the clone then fails
    /// cleanly (401 from the controller) and the caller retries later.
    pub async fn ensure_clone(&self) -> Result<bool, GitSyncError> {
        if self.is_cloned() {
            return Ok(false);
        }
        if let Some(parent) = self.repo_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let repo = self.repo_dir.display().to_string();
        let mut args = self.auth_config_args();
        args.extend(["clone".to_string(), self.remote_url.clone(), repo]);
        self.run_git_in(self.repo_dir.parent().unwrap_or(Path::new(".")), &args).await?;
        self.run(&["config", "user.name", "convoy-agent"]).await?;
        self.run(&["config", "user.email", "agent@localhost"]).await?;
        tracing::info!(repo = %self.repo_dir.display(), "config repository cloned");
        Ok(true)
    }

    /// Fetch and reconcile with `origin/main`.
    pub async fn pull(&self) -> Result<PullOutcome, GitSyncError> {
        if !self.is_cloned() {
            self.ensure_clone().await?;
            return Ok(PullOutcome::Cloned);
        }

        // Uncommitted edits count as local advance; snapshot them first
        // so a hard reset can never destroy work.
        if !self.status_porcelain().await?.is_empty() {
            self.run(&["add", "-A"]).await?;
            self.run(&["commit", "-m", "snapshot local changes before sync"]).await?;
        }

        let mut args = self.auth_config_args();
        args.extend(["fetch".to_string(), "origin".to_string()]);
        self.run_strings(&args).await?;

        let ahead = self.rev_count("origin/main..HEAD").await?;
        let behind = self.rev_count("HEAD..origin/main").await?;

        match (ahead > 0, behind > 0) {
            (false, false) => Ok(PullOutcome::UpToDate),
            (false, true) => {
                self.run(&["merge", "--ff-only", "origin/main"]).await?;
                Ok(PullOutcome::FastForwarded)
            }
            (true, false) => {
                // Local-only commits; nothing to reconcile until a push.
                Ok(PullOutcome::UpToDate)
            }
            (true, true) => {
                let backup_branch = self.backup_branch_name();
                self.run(&["branch", &backup_branch, "HEAD"]).await?;
                self.run(&["reset", "--hard", "origin/main"]).await?;
                tracing::warn!(
                    backup = %backup_branch,
                    "diverged from controller; local changes parked on backup branch"
                );
                Ok(PullOutcome::Diverged { backup_branch })
            }
        }
    }

    /// Commit local changes and push to the controller.
    pub async fn push(&self) -> Result<(), GitSyncError> {
        if !self.status_porcelain().await?.is_empty() {
            self.run(&["add", "-A"]).await?;
            self.run(&["commit", "-m", "agent config changes"]).await?;
        }
        let mut args = self.auth_config_args();
        args.extend(["push".to_string(), "origin".to_string(), "HEAD:main".to_string()]);
        self.run_strings(&args).await?;
        tracing::info!("local config changes pushed");
        Ok(())
    }

    /// Uncommitted local changes, `git status --porcelain` form.
    pub async fn check_changes(&self) -> Result<String, GitSyncError> {
        self.status_porcelain().await
    }

    /// Backup branches, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<String>, GitSyncError> {
        let output = self
            .run(&["branch", "--list", "backup-*", "--format=%(refname:short)"])
            .await?;
        let mut backups: Vec<String> =
            output.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
        backups.sort();
        Ok(backups)
    }

    /// Restore a backup's files into the working tree without pushing.
    ///
    /// `latest` resolves to the newest backup branch. Returns the branch
    /// that was restored.
    pub async fn recover_backup(&self, name: &str) -> Result<String, GitSyncError> {
        let backups = self.list_backups().await?;
        let branch = if name == "latest" {
            backups.last().cloned().ok_or(GitSyncError::NoBackups)?
        } else if backups.iter().any(|b| b == name) {
            name.to_string()
        } else {
            return Err(GitSyncError::UnknownBackup(name.to_string()));
        };
        self.run(&["checkout", &branch, "--", "."]).await?;
        tracing::info!(branch = %branch, "backup restored into working tree");
        Ok(branch)
    }

    /// Operator-driven merge of a backup branch; conflicts surface as
    /// command errors and abort the merge.
    pub async fn merge_backup(&self, name: &str) -> Result<(), GitSyncError> {
        let backups = self.list_backups().await?;
        if !backups.iter().any(|b| b == name) {
            return Err(GitSyncError::UnknownBackup(name.to_string()));
        }
        match self.run(&["merge", "--no-edit", name]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = self.run(&["merge", "--abort"]).await;
                Err(e)
            }
        }
    }

    fn backup_branch_name(&self) -> String {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        format!("backup-{stamp}")
    }

    async fn status_porcelain(&self) -> Result<String, GitSyncError> {
        Ok(self.run(&["status", "--porcelain"]).await?.trim().to_string())
    }

    async fn rev_count(&self, range: &str) -> Result<u32, GitSyncError> {
        let output = self.run(&["rev-list", "--count", range]).await?;
        Ok(output.trim().parse().unwrap_or(0))
    }

    /// Signed auth headers as `-c http.extraHeader=...` arguments.
    fn auth_config_args(&self) -> Vec<String> {
        let timestamp_ms = self.clock.epoch_ms();
        let payload = wire_auth::git_payload(&self.agent_id, timestamp_ms);
        let signature = self.identity.sign_base64(&payload);
        [
            format!("{}: {}", wire_auth::HEADER_AGENT, self.agent_id),
            format!("{}: {}", wire_auth::HEADER_TIMESTAMP, timestamp_ms),
            format!("{}: {}", wire_auth::HEADER_SIGNATURE, signature),
        ]
        .into_iter()
        .flat_map(|header| ["-c".to_string(), format!("http.extraHeader={header}")])
        .collect()
    }

    async fn run(&self, args: &[&str]) -> Result<String, GitSyncError> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.run_strings(&owned).await
    }

    async fn run_strings(&self, args: &[String]) -> Result<String, GitSyncError> {
        self.run_git_in(&self.repo_dir, args).await
    }

    async fn run_git_in(&self, dir: &Path, args: &[String]) -> Result<String, GitSyncError> {
        let joined = args.join(" ");
        let mut cmd = tokio::process::Command::new("git");
        cmd.current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitSyncError::Timeout { args: joined.clone() })??;

        if !output.status.success() {
            return Err(GitSyncError::Command {
                args: joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
#[path = "gitsync_tests.rs"]
mod tests;
