// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-only agent settings and on-disk layout.
//!
//! `config.json` holds what must never travel through the config repo:
//! the assigned identity, controller endpoints, and local serving knobs.
//! Everything else the agent obeys comes from the Git-synced per-agent
//! document.

use convoy_core::fsjson::{self, PersistError};
use convoy_core::AgentId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_PORT: u16 = 8088;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalSettings {
    /// Identity assigned at registration; never written back to Git.
    pub agent_id: Option<AgentId>,
    /// WebSocket endpoint of the controller hub, e.g. `ws://ctrl:7770`.
    pub controller_ws_url: Option<String>,
    /// HTTP endpoint of the controller (Git transport), e.g. `http://ctrl:7780`.
    pub controller_http_url: Option<String>,
    /// Local query API port.
    pub api_port: u16,
    /// Local query API bind address.
    pub api_bind: String,
    /// CORS origin admitted by the local API; none means same-origin only.
    pub cors_allowed_origin: Option<String>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            agent_id: None,
            controller_ws_url: None,
            controller_http_url: None,
            api_port: DEFAULT_API_PORT,
            api_bind: "0.0.0.0".to_string(),
            cors_allowed_origin: None,
        }
    }
}

impl LocalSettings {
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        Ok(fsjson::load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        fsjson::save_json(path, self)
    }
}

/// On-disk layout under the agent data directory.
#[derive(Debug, Clone)]
pub struct Layout {
    pub data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// `config.json`: local-only settings.
    pub fn local_config(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// `agent_key` / `agent_key.pub`: identity files.
    pub fn key(&self) -> PathBuf {
        self.data_dir.join("agent_key")
    }

    /// `config-repo/`: the pulled Git working tree.
    pub fn repo(&self) -> PathBuf {
        self.data_dir.join("config-repo")
    }

    /// `agents/<id>.json` inside the working tree.
    pub fn agent_document(&self, id: &AgentId) -> PathBuf {
        self.repo().join("agents").join(format!("{}.json", id))
    }

    /// `state.json`: the workflow journal.
    pub fn journal(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// `agent.log`: the structured log stream.
    pub fn log(&self) -> PathBuf {
        self.data_dir.join("agent.log")
    }

    /// `agent.pid`: single-instance lock.
    pub fn lock(&self) -> PathBuf {
        self.data_dir.join("agent.pid")
    }
}

#[cfg(test)]
#[path = "localcfg_tests.rs"]
mod tests;
