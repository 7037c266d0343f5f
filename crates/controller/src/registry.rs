// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative catalog of agents.
//!
//! One record per agent: identity binding (id ↔ public key), liveness
//! bookkeeping, operator metadata, and the last-known mirror of the
//! agent's Git-backed config. Ids are immutable once issued and the key
//! binding holds for the agent's lifetime.

use convoy_core::fsjson::{self as persist, PersistError};
use convoy_core::AgentId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: AgentId,
    /// PEM-encoded public key; bound to the id for the agent's lifetime.
    pub public_key: String,
    pub hostname: String,
    pub platform: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    /// IP observed on the most recent control-channel session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_ip: Option<String>,
    /// Local query API port reported by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_port: Option<u16>,
    /// Operator-pinned API address; wins over observed ip + port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_api_address: Option<String>,
    /// Free-form operator metadata plus the agent's last status report.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Last-known mirror of `agents/<id>.json` from the config repo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_mirror: Option<Value>,
    pub registered_at_ms: u64,
}

impl AgentRecord {
    /// Address the pull-through proxy should dial, if known.
    pub fn api_address(&self) -> Option<String> {
        if let Some(pinned) = &self.pinned_api_address {
            return Some(pinned.clone());
        }
        let ip = self.observed_ip.as_ref()?;
        Some(format!("{}:{}", ip, self.api_port.unwrap_or(8088)))
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    agents: HashMap<String, AgentRecord>,
}

/// Shared, persisted agent catalog.
pub struct Registry {
    path: PathBuf,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn open(path: PathBuf) -> Result<Self, RegistryError> {
        let mut state: RegistryState = persist::load_json(&path)?.unwrap_or_default();
        // Nothing is connected at startup; stale `online` is a lie.
        for record in state.agents.values_mut() {
            if record.status == AgentStatus::Online {
                record.status = AgentStatus::Offline;
            }
        }
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentRecord> {
        self.state.lock().agents.get(id.as_str()).cloned()
    }

    pub fn list(&self) -> Vec<AgentRecord> {
        let state = self.state.lock();
        let mut records: Vec<AgentRecord> = state.agents.values().cloned().collect();
        records.sort_by(|a, b| a.registered_at_ms.cmp(&b.registered_at_ms));
        records
    }

    pub fn public_key(&self, id: &AgentId) -> Option<String> {
        self.state.lock().agents.get(id.as_str()).map(|r| r.public_key.clone())
    }

    /// Create the record for a newly registered agent.
    pub fn register(&self, record: AgentRecord) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        state.agents.insert(record.id.as_str().to_string(), record);
        self.save(&state)
    }

    /// Record a heartbeat (or any sign of life) for an online agent.
    pub fn touch(&self, id: &AgentId, now_ms: u64) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.last_heartbeat_ms = Some(now_ms);
        })
    }

    /// Transition to online at session admission.
    pub fn mark_online(
        &self,
        id: &AgentId,
        now_ms: u64,
        observed_ip: Option<String>,
        api_port: Option<u16>,
    ) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.status = AgentStatus::Online;
            record.last_heartbeat_ms = Some(now_ms);
            if observed_ip.is_some() {
                record.observed_ip = observed_ip.clone();
            }
            if api_port.is_some() {
                record.api_port = api_port;
            }
        })
    }

    /// Transition to offline at session teardown or liveness timeout.
    pub fn mark_offline(&self, id: &AgentId) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.status = AgentStatus::Offline;
        })
    }

    /// Keep the agent's last status report in the metadata bag.
    pub fn record_status(
        &self,
        id: &AgentId,
        fields: Map<String, Value>,
    ) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.metadata.insert("lastStatus".to_string(), Value::Object(fields.clone()));
        })
    }

    /// Refresh the database mirror of the agent's config document.
    pub fn set_config_mirror(&self, id: &AgentId, config: Value) -> Result<(), RegistryError> {
        self.update(id, |record| {
            record.config_mirror = Some(config.clone());
        })
    }

    /// Delete a record; explicit admin action only.
    pub fn remove(&self, id: &AgentId) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.agents.remove(id.as_str()).is_none() {
            return Err(RegistryError::UnknownAgent(id.clone()));
        }
        self.save(&state)
    }

    fn update(
        &self,
        id: &AgentId,
        mutate: impl Fn(&mut AgentRecord),
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let record = state
            .agents
            .get_mut(id.as_str())
            .ok_or_else(|| RegistryError::UnknownAgent(id.clone()))?;
        mutate(record);
        self.save(&state)
    }

    fn save(&self, state: &RegistryState) -> Result<(), RegistryError> {
        persist::save_json(&self.path, state)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
