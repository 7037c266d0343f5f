// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable event sink for agent alerts.
//!
//! Alerts are immutable once recorded; acknowledgement is tracked on the
//! controller-side record, never by rewriting the alert itself.

use convoy_core::fsjson::{self as persist, PersistError};
use convoy_core::{AgentId, AlertLevel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: String,
    pub agent_id: AgentId,
    pub level: AlertLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("unknown alert: {0}")]
    Unknown(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AlertState {
    alerts: Vec<AlertRecord>,
}

/// Cap kept on disk; oldest entries are dropped past this.
const MAX_RETAINED: usize = 10_000;

pub struct AlertSink {
    path: PathBuf,
    state: Mutex<AlertState>,
}

impl AlertSink {
    pub fn open(path: PathBuf) -> Result<Self, AlertError> {
        let state = persist::load_json(&path)?.unwrap_or_default();
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn record(
        &self,
        agent_id: AgentId,
        level: AlertLevel,
        message: String,
        details: Option<Map<String, Value>>,
        now_ms: u64,
    ) -> Result<AlertRecord, AlertError> {
        let record = AlertRecord {
            id: Uuid::new_v4().to_string(),
            agent_id,
            level,
            message,
            details,
            timestamp_ms: now_ms,
            acknowledged: false,
        };
        let mut state = self.state.lock();
        state.alerts.push(record.clone());
        if state.alerts.len() > MAX_RETAINED {
            let excess = state.alerts.len() - MAX_RETAINED;
            state.alerts.drain(..excess);
        }
        persist::save_json(&self.path, &*state)?;
        Ok(record)
    }

    /// Newest first, optionally filtered by minimum level.
    pub fn list(&self, min_level: Option<AlertLevel>, limit: usize) -> Vec<AlertRecord> {
        let state = self.state.lock();
        state
            .alerts
            .iter()
            .rev()
            .filter(|a| min_level.is_none_or(|min| a.level >= min))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn acknowledge(&self, id: &str) -> Result<(), AlertError> {
        let mut state = self.state.lock();
        let alert = state
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AlertError::Unknown(id.to_string()))?;
        alert.acknowledged = true;
        persist::save_json(&self.path, &*state)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;
