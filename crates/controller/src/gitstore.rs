// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git-backed configuration store.
//!
//! The controller keeps the single config repository as a checked-out
//! working tree and writes to it directly; every write is auto-committed.
//! Pushes from agents land in the same tree via
//! `receive.denyCurrentBranch=updateInstead`, after which the database
//! mirror is refreshed from the files on disk. All Git work shells out to
//! the system `git` binary under a timeout.

use crate::registry::Registry;
use convoy_core::{AgentConfig, AgentId, Workflow};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Repository layout: per-agent documents.
pub fn agent_document(id: &AgentId) -> String {
    format!("agents/{}.json", id)
}

/// Repository layout: workflow documents.
pub fn workflow_document(workflow_id: &str) -> String {
    format!("workflows/{}.json", workflow_id)
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} timed out")]
    Timeout { args: String },

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("config document {path} is not valid JSON: {source}")]
    Document {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub struct ConfigStore {
    repo_dir: PathBuf,
    timeout: Duration,
    /// Serializes write+commit sequences; agent pushes are serialized by
    /// Git's own locking.
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(repo_dir: PathBuf, timeout: Duration) -> Self {
        Self { repo_dir, timeout, write_lock: Mutex::new(()) }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Create and configure the repository if it does not exist yet.
    pub async fn init(&self) -> Result<(), GitError> {
        if self.repo_dir.join(".git").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.repo_dir).await?;
        self.git(&["init"]).await?;
        self.git(&["symbolic-ref", "HEAD", "refs/heads/main"]).await?;
        self.git(&["config", "user.name", "convoyd"]).await?;
        self.git(&["config", "user.email", "convoyd@localhost"]).await?;
        // Agent pushes must update the checked-out tree.
        self.git(&["config", "receive.denyCurrentBranch", "updateInstead"]).await?;

        tokio::fs::create_dir_all(self.repo_dir.join("agents")).await?;
        tokio::fs::create_dir_all(self.repo_dir.join("workflows")).await?;
        tokio::fs::write(self.repo_dir.join("agents").join(".gitkeep"), b"").await?;
        tokio::fs::write(self.repo_dir.join("workflows").join(".gitkeep"), b"").await?;
        self.commit_all("initialize config repository").await?;
        tracing::info!(repo = %self.repo_dir.display(), "config repository initialized");
        Ok(())
    }

    /// Read one JSON document, `None` when absent.
    pub async fn read_document(&self, rel: &str) -> Result<Option<Value>, GitError> {
        let path = self.repo_dir.join(rel);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|source| GitError::Document { path: rel.to_string(), source })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GitError::Io(e)),
        }
    }

    /// Write one JSON document and commit.
    pub async fn write_document(
        &self,
        rel: &str,
        value: &Value,
        message: &str,
    ) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        self.write_file(rel, value).await?;
        self.commit_all(message).await
    }

    /// Delete a document and commit; missing files are fine.
    pub async fn remove_document(&self, rel: &str, message: &str) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        let path = self.repo_dir.join(rel);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(GitError::Io(e)),
        }
        self.commit_all(message).await
    }

    /// Ensure a default config document exists for a new agent.
    pub async fn init_agent_config(&self, id: &AgentId) -> Result<AgentConfig, GitError> {
        let rel = agent_document(id);
        if let Some(value) = self.read_document(&rel).await? {
            return serde_json::from_value(value)
                .map_err(|source| GitError::Document { path: rel, source });
        }
        let config = AgentConfig::default();
        let value = serde_json::to_value(&config)
            .map_err(|source| GitError::Document { path: rel.clone(), source })?;
        self.write_document(&rel, &value, &format!("initialize config for agent {}", id))
            .await?;
        Ok(config)
    }

    /// Write a workflow into `workflows/` and the target agent's config,
    /// in one commit.
    pub async fn upsert_workflow(
        &self,
        agent_id: &AgentId,
        workflow: &Workflow,
    ) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        let workflow_value = serde_json::to_value(workflow).map_err(|source| {
            GitError::Document { path: workflow_document(&workflow.id), source }
        })?;
        self.write_file(&workflow_document(&workflow.id), &workflow_value).await?;

        let mut config = self.load_agent_config(agent_id).await?;
        config.workflows.retain(|w| w.id != workflow.id);
        config.workflows.push(workflow.clone());
        self.store_agent_config(agent_id, &config).await?;

        self.commit_all(&format!("deploy workflow {} to agent {}", workflow.id, agent_id))
            .await
    }

    /// Remove a workflow from the agent's config (and the shared
    /// `workflows/` copy).
    pub async fn remove_workflow(
        &self,
        agent_id: &AgentId,
        workflow_id: &str,
    ) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;
        let path = self.repo_dir.join(workflow_document(workflow_id));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GitError::Io(e)),
        }
        let mut config = self.load_agent_config(agent_id).await?;
        config.workflows.retain(|w| w.id != workflow_id);
        self.store_agent_config(agent_id, &config).await?;
        self.commit_all(&format!("remove workflow {} from agent {}", workflow_id, agent_id))
            .await
    }

    /// Re-read every agent document and refresh the registry mirrors.
    ///
    /// Runs after each successful receive-pack so pushes from agents are
    /// reflected in the database view. Returns the number of documents
    /// mirrored.
    pub async fn sync_mirror(&self, registry: &Registry) -> Result<usize, GitError> {
        let agents_dir = self.repo_dir.join("agents");
        let mut synced = 0;
        let mut entries = match tokio::fs::read_dir(&agents_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(GitError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name.strip_suffix(".json") else { continue };
            let rel = format!("agents/{}", name);
            if let Some(value) = self.read_document(&rel).await? {
                let agent_id = AgentId::new(id);
                if registry.set_config_mirror(&agent_id, value).is_ok() {
                    synced += 1;
                }
            }
        }
        Ok(synced)
    }

    async fn load_agent_config(&self, id: &AgentId) -> Result<AgentConfig, GitError> {
        let rel = agent_document(id);
        match self.read_document(&rel).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|source| GitError::Document { path: rel, source }),
            None => Ok(AgentConfig::default()),
        }
    }

    async fn store_agent_config(
        &self,
        id: &AgentId,
        config: &AgentConfig,
    ) -> Result<(), GitError> {
        let rel = agent_document(id);
        let value = serde_json::to_value(config)
            .map_err(|source| GitError::Document { path: rel.clone(), source })?;
        self.write_file(&rel, &value).await
    }

    async fn write_file(&self, rel: &str, value: &Value) -> Result<(), GitError> {
        let path = self.repo_dir.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut body = serde_json::to_vec_pretty(value)
            .map_err(|source| GitError::Document { path: rel.to_string(), source })?;
        body.push(b'\n');
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    /// Stage everything and commit when the tree is dirty.
    async fn commit_all(&self, message: &str) -> Result<(), GitError> {
        self.git(&["add", "-A"]).await?;
        let status = self.git(&["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(());
        }
        self.git(&["commit", "-m", message]).await?;
        Ok(())
    }

    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let joined = args.join(" ");
        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("-C")
            .arg(&self.repo_dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitError::Timeout { args: joined.clone() })??;

        if !output.status.success() {
            return Err(GitError::Command {
                args: joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
#[path = "gitstore_tests.rs"]
mod tests;
