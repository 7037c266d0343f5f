// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound control-channel handle shared across subsystems.
//!
//! The executor, watcher, and Git sync all emit alerts and status
//! reports; this handle decouples them from the channel client. Sends
//! are non-blocking: when the channel is down (or the agent runs
//! standalone) messages are dropped with a log line, matching the
//! at-most-once wire semantics.

use convoy_core::AlertLevel;
use convoy_wire::AgentMessage;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<AgentMessage>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::Sender<AgentMessage>) -> Self {
        Self { tx }
    }

    /// A handle wired to a drain task; used in standalone mode and tests.
    pub fn detached() -> (Self, mpsc::Receiver<AgentMessage>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }

    pub fn send_alert(&self, level: AlertLevel, message: String, details: Option<Map<String, Value>>) {
        self.send(AgentMessage::Alert { level, message, details });
    }

    pub fn send_status(&self, fields: Map<String, Value>) {
        self.send(AgentMessage::Status { fields });
    }

    fn send(&self, message: AgentMessage) {
        if let Err(e) = self.tx.try_send(message) {
            tracing::debug!(error = %e, "outbound message dropped");
        }
    }
}
