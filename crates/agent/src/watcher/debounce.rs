// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-(rule, path) debounce.
//!
//! Real file systems storm: editor saves, copy-on-write renames, and
//! scanners can produce a dozen events for one logical change. Each
//! (rule id, resolved path) pair may fire at most once per cooldown
//! window; an event landing exactly on the boundary is admitted.

use convoy_core::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub struct DebounceMap<C: Clock> {
    clock: C,
    windows: Mutex<HashMap<(String, PathBuf), Instant>>,
}

impl<C: Clock> DebounceMap<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, windows: Mutex::new(HashMap::new()) }
    }

    /// True when the pair is outside its window; records the fire time.
    pub fn admit(&self, rule_id: &str, path: &Path, cooldown: Duration) -> bool {
        let now = self.clock.now();
        let key = (rule_id.to_string(), path.to_path_buf());
        let mut windows = self.windows.lock();
        if let Some(last) = windows.get(&key) {
            if now.duration_since(*last) < cooldown {
                return false;
            }
        }
        windows.insert(key, now);
        true
    }

    /// Drop entries idle longer than `max_age` to bound the map.
    pub fn prune(&self, max_age: Duration) {
        let now = self.clock.now();
        self.windows.lock().retain(|_, last| now.duration_since(*last) < max_age);
    }

    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "debounce_tests.rs"]
mod tests;
