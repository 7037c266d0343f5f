// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public-key verification of agent credentials.
//!
//! Agents prove possession of their registered key by signing a
//! timestamped payload (see `convoy_wire::auth` for the formats). The
//! controller verifies against the PEM key bound to the agent id in the
//! registry. Nothing here is retried: a bad signature is a terminal
//! rejection for that request or session.

use base64::Engine;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("stored public key is not valid PEM")]
    InvalidKey,
    #[error("signature is not valid base64")]
    InvalidEncoding,
    #[error("signature verification failed")]
    BadSignature,
    #[error("signed timestamp outside tolerated skew")]
    StaleTimestamp,
}

/// Verify a base64 RSA-SHA256 signature over `payload` against a PEM key.
pub fn verify_signature(
    public_key_pem: &str,
    payload: &str,
    signature_b64: &str,
) -> Result<(), AuthError> {
    let key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|_| AuthError::InvalidKey)?;
    let verifying_key = VerifyingKey::<Sha256>::new(key);
    let raw = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidEncoding)?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|_| AuthError::InvalidEncoding)?;
    verifying_key
        .verify(payload.as_bytes(), &signature)
        .map_err(|_| AuthError::BadSignature)
}

/// Verify a signed, timestamped payload: freshness first, then signature.
pub fn verify_fresh_signature(
    public_key_pem: &str,
    payload: &str,
    signature_b64: &str,
    timestamp_ms: u64,
    now_ms: u64,
) -> Result<(), AuthError> {
    if !convoy_wire::auth::timestamp_fresh(timestamp_ms, now_ms) {
        return Err(AuthError::StaleTimestamp);
    }
    verify_signature(public_key_pem, payload, signature_b64)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
