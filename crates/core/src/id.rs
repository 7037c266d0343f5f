// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Agent ids are issued once by the controller and are immutable for the
//! agent's lifetime; execution ids are minted per workflow run. Both are
//! UUID-shaped opaque strings, kept as strings so ids parsed from config
//! or the wire never round-trip through a binary representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Returns a string slice truncated to at most `n` characters, for
/// compact id display in log lines.
pub fn short(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Opaque agent identifier, issued at registration.
    AgentId
}

string_id! {
    /// Identifier for one workflow execution (journal key).
    ExecutionId
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
