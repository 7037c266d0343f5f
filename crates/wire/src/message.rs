// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use convoy_core::{AgentId, AlertLevel, LogLevel};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message from an agent to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentMessage {
    /// First-run handshake: trade a registration token for an identity.
    #[serde(rename_all = "camelCase")]
    Registration {
        token: String,
        /// PEM-encoded public key, bound to the issued id for life.
        public_key: String,
        hostname: String,
        platform: String,
        /// Local query API port, so the proxy can route without pinning.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_port: Option<u16>,
    },

    /// Returning-agent handshake, proven by a key signature.
    #[serde(rename_all = "camelCase")]
    Reconnection {
        agent_id: AgentId,
        timestamp_ms: u64,
        /// Base64 RSA-SHA256 over `reconnect:<agentId>:<timestampMs>`.
        signature: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_port: Option<u16>,
    },

    /// Liveness tick.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Free-form operational report (e.g. Git divergence).
    Status { fields: Map<String, Value> },

    /// Alert for the controller's event sink.
    Alert {
        level: AlertLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Map<String, Value>>,
    },
}

/// Message from the controller to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerMessage {
    /// Registration accepted; carries the assigned identity.
    #[serde(rename_all = "camelCase")]
    Registered { agent_id: AgentId },

    /// Instruction for the agent.
    Command {
        #[serde(flatten)]
        command: Command,
    },
}

/// Command tags and their arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Pull config and reload every affected subsystem.
    ReloadConfig,
    /// Restart the file watcher with the current rules.
    ReloadFilewatcher,
    /// Fetch and fast-forward the config working tree.
    GitPull,
    /// Drop one workflow from the loaded table.
    #[serde(rename_all = "camelCase")]
    RemoveWorkflow { workflow_id: String },
    /// Change the runtime log level.
    SetLogLevel { level: LogLevel },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReloadConfig => "reload-config",
            Command::ReloadFilewatcher => "reload-filewatcher",
            Command::GitPull => "git-pull",
            Command::RemoveWorkflow { .. } => "remove-workflow",
            Command::SetLogLevel { .. } => "set-log-level",
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
