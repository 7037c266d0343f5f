// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-agent configuration document.
//!
//! This is the JSON stored at `agents/<agentId>.json` in the config repo.
//! The Git working tree is the source of truth; anything the agent holds
//! in memory is a derived view refreshed on `reload-config`.

use crate::level::LogLevel;
use crate::rule::WatcherRule;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub log_settings: LogSettings,
    pub file_watcher_settings: FileWatcherSettings,
    pub file_watcher_rules: Vec<WatcherRule>,
    pub file_browser_settings: FileBrowserSettings,
    pub workflows: Vec<Workflow>,
}

/// Embedded SSH/SFTP capability surface for future agent-to-agent
/// traffic. Config and reporting only; no server protocol in the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSection {
    pub ssh_server_port: u16,
    pub authorized_ssh_keys: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self { ssh_server_port: 2222, authorized_ssh_keys: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSettings {
    pub level: LogLevel,
    /// Rotate the log when it exceeds this size.
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: u64,
    /// Delete rotated logs older than this.
    pub max_age_days: u32,
    /// Keep at most this many rotated files.
    pub max_backups: u32,
    /// Gzip rotated logs.
    pub compress: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            max_size_mb: 10,
            max_age_days: 30,
            max_backups: 5,
            compress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileWatcherSettings {
    /// Root for pattern-mode watchers.
    pub scan_dir: PathBuf,
    /// Recurse into subdirectories.
    pub scan_sub_dir: bool,
    /// Cap on concurrent file processors.
    pub max_concurrent: usize,
}

impl Default for FileWatcherSettings {
    fn default() -> Self {
        Self { scan_dir: PathBuf::new(), scan_sub_dir: true, max_concurrent: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileBrowserSettings {
    pub enabled: bool,
    /// Whitelist of base paths; empty means the agent data dir only.
    pub allowed_paths: Vec<PathBuf>,
    /// Upload byte cap.
    pub max_upload_size: u64,
    /// Directory enumeration cap.
    pub max_list_items: usize,
}

impl Default for FileBrowserSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_paths: Vec::new(),
            max_upload_size: 32 * 1024 * 1024,
            max_list_items: 1000,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
