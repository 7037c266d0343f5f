// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared authentication payload formats.
//!
//! Both sides must sign and verify byte-identical payloads; the format
//! strings live here so they cannot drift apart. Signatures themselves
//! are RSA-SHA256, base64-encoded; the crypto stays on each side.

use convoy_core::AgentId;

/// Header carrying the agent id on authenticated HTTP requests.
pub const HEADER_AGENT: &str = "x-convoy-agent";
/// Header carrying the signing timestamp (unix millis).
pub const HEADER_TIMESTAMP: &str = "x-convoy-timestamp";
/// Header carrying the base64 signature.
pub const HEADER_SIGNATURE: &str = "x-convoy-signature";

/// Maximum tolerated clock skew for signed timestamps.
pub const MAX_SKEW_MS: u64 = 5 * 60 * 1000;

/// Payload signed for a `reconnection` control-channel handshake.
pub fn reconnect_payload(agent_id: &AgentId, timestamp_ms: u64) -> String {
    format!("reconnect:{}:{}", agent_id, timestamp_ms)
}

/// Payload signed for Git transport requests.
pub fn git_payload(agent_id: &AgentId, timestamp_ms: u64) -> String {
    format!("git:{}:{}", agent_id, timestamp_ms)
}

/// Whether a signed timestamp is within the tolerated skew of `now`.
pub fn timestamp_fresh(timestamp_ms: u64, now_ms: u64) -> bool {
    now_ms.abs_diff(timestamp_ms) <= MAX_SKEW_MS
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
