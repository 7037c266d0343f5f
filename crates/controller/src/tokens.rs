// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registration token service.
//!
//! Tokens are time-limited and single-use: an admin mints one, exactly one
//! agent consumes it, and the record is retained afterwards for audit.
//! An optional pinned API address rides along onto the resulting agent
//! record.

use convoy_core::fsjson::{self as persist, PersistError};
use convoy_core::AgentId;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default token lifetime: one hour.
pub const DEFAULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_api_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_by: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at_ms: Option<u64>,
}

impl TokenRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    pub fn is_used(&self) -> bool {
        self.used_by.is_some()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("unknown token")]
    Unknown,
    #[error("token already used")]
    AlreadyUsed,
    #[error("token expired")]
    Expired,
    #[error("persist failed: {0}")]
    Persist(String),
}

impl From<PersistError> for TokenError {
    fn from(e: PersistError) -> Self {
        TokenError::Persist(e.to_string())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenState {
    tokens: Vec<TokenRecord>,
}

pub struct TokenService {
    path: PathBuf,
    state: Mutex<TokenState>,
}

impl TokenService {
    pub fn open(path: PathBuf) -> Result<Self, TokenError> {
        let state = persist::load_json(&path)?.unwrap_or_default();
        Ok(Self { path, state: Mutex::new(state) })
    }

    /// Mint a fresh token.
    pub fn create(
        &self,
        now_ms: u64,
        ttl_secs: u64,
        pinned_api_address: Option<String>,
    ) -> Result<TokenRecord, TokenError> {
        let record = TokenRecord {
            token: generate_token(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + ttl_secs * 1000,
            pinned_api_address,
            used_by: None,
            used_at_ms: None,
        };
        let mut state = self.state.lock();
        state.tokens.push(record.clone());
        persist::save_json(&self.path, &*state)?;
        Ok(record)
    }

    /// Consume a token for a successful registration.
    ///
    /// Fails on unknown, already-used, or expired tokens without mutating
    /// anything; on success marks the token used by the new agent id.
    pub fn consume(
        &self,
        token: &str,
        agent_id: &AgentId,
        now_ms: u64,
    ) -> Result<TokenRecord, TokenError> {
        let mut state = self.state.lock();
        let record = state
            .tokens
            .iter_mut()
            .find(|t| t.token == token)
            .ok_or(TokenError::Unknown)?;
        if record.is_used() {
            return Err(TokenError::AlreadyUsed);
        }
        if record.is_expired(now_ms) {
            return Err(TokenError::Expired);
        }
        record.used_by = Some(agent_id.clone());
        record.used_at_ms = Some(now_ms);
        let consumed = record.clone();
        persist::save_json(&self.path, &*state)?;
        Ok(consumed)
    }

    /// Audit view: every token ever minted, consumed or not.
    pub fn list(&self) -> Vec<TokenRecord> {
        self.state.lock().tokens.clone()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tests;
