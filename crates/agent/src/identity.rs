// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity: a persisted RSA keypair.
//!
//! Generated once on first run and written with owner-only permissions;
//! the public half is registered with the controller and bound to the
//! issued agent id for the agent's lifetime. The private key signs the
//! reconnect handshake and Git transport requests.

use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{
    DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key size for generated identities.
const KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key generation failed: {0}")]
    Generate(rsa::Error),
    #[error("stored key at {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("key encoding failed: {0}")]
    Encode(String),
}

pub struct Identity {
    signing_key: SigningKey<Sha256>,
    public_key_pem: String,
}

impl Identity {
    /// Load the keypair from `key_path`, generating and persisting a
    /// fresh one on first run. Returns whether generation happened.
    pub fn load_or_generate(key_path: &Path) -> Result<(Self, bool), IdentityError> {
        match std::fs::read_to_string(key_path) {
            Ok(pem) => {
                let private =
                    RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| IdentityError::Unreadable {
                        path: key_path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                Ok((Self::from_private(private)?, false))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate(key_path)?;
                Ok((identity, true))
            }
            Err(e) => Err(IdentityError::Io(e)),
        }
    }

    fn generate(key_path: &Path) -> Result<Self, IdentityError> {
        tracing::info!(path = %key_path.display(), "generating {KEY_BITS}-bit RSA identity");
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(IdentityError::Generate)?;

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Encode(e.to_string()))?;
        std::fs::write(key_path, private_pem.as_bytes())?;
        restrict_permissions(key_path)?;

        let identity = Self::from_private(private)?;
        std::fs::write(public_path(key_path), identity.public_key_pem.as_bytes())?;
        Ok(identity)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, IdentityError> {
        let public_key_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Encode(e.to_string()))?;
        Ok(Self { signing_key: SigningKey::new(private), public_key_pem })
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign a payload, returning base64 for transport.
    pub fn sign_base64(&self, payload: &str) -> String {
        let signature = self.signing_key.sign(payload.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

fn public_path(key_path: &Path) -> PathBuf {
    let mut name = key_path.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
