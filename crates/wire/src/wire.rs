// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encoding, decoding, and session close codes.

use serde::Serialize;
use thiserror::Error;

use crate::message::{AgentMessage, ControllerMessage};

/// Close code for a frame the peer could not parse.
pub const CLOSE_MALFORMED: u16 = 4400;
/// Close code for failed admission: bad token, token reuse, key mismatch.
pub const CLOSE_AUTH_FAILURE: u16 = 4401;
/// Close code when silence exceeded twice the heartbeat interval.
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4408;
/// Close code when a newer session for the same agent id took over.
pub const CLOSE_PREEMPTED: u16 = 4409;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize a message to the JSON text carried in one WebSocket frame.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Parse an agent-to-controller frame.
pub fn decode_agent(text: &str) -> Result<AgentMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Parse a controller-to-agent frame.
pub fn decode_controller(text: &str) -> Result<ControllerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
