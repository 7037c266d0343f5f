// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-watcher rules: what to match, when to act, and what to do.
//!
//! A file event is processed by a rule only if the directory selector,
//! filename regex, optional content regex, time window, and day-of-week
//! bitmask all admit it. Each (rule, path) pair is additionally debounced
//! by the agent's watcher for `processing.cooldownSecs`.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// The rule names an exact directory.
    Absolute,
    /// The rule names a directory regex beneath the global scan root.
    Pattern,
}

/// File operations applied, in declared order, to a matched file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOperations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_to: Option<PathBuf>,
    /// `copy` leaves the source in place; `move` removes it once the copy
    /// has landed.
    #[serde(default)]
    pub copy_option: CopyOption,
    /// New filename within the source directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    /// Insert a timestamp before the extension of copied/renamed files.
    #[serde(default)]
    pub insert_timestamp: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_to: Option<PathBuf>,
    /// Copy through `<name><tempExtension>` then atomically rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_extension: Option<String>,
    /// Delete the source after all other operations succeed.
    #[serde(default)]
    pub remove_after: bool,
    /// Replace existing destination files instead of failing.
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyOption {
    #[default]
    Copy,
    Move,
}

/// External program hooks around the operation sequence.
///
/// Each field is either a shell invocation or a `WF:<name>` workflow
/// reference; see [`HookKind::parse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
}

/// Parsed form of a hook field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookKind {
    Shell(String),
    Workflow(String),
}

impl HookKind {
    pub fn parse(raw: &str) -> HookKind {
        match raw.strip_prefix("WF:") {
            Some(name) => HookKind::Workflow(name.trim().to_string()),
            None => HookKind::Shell(raw.to_string()),
        }
    }
}

/// Clock-of-day and day-of-week admission window, plus the settle delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRestrictions {
    #[serde(default)]
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_end_minute")]
    pub end_minute: u32,
    /// Bitmask, bit 0 = Monday through bit 6 = Sunday.
    #[serde(default = "default_days_of_week")]
    pub days_of_week: u8,
    /// Wait this long after the event before acting, letting upstream
    /// writers finish.
    #[serde(default)]
    pub process_after_secs: u64,
}

fn default_end_hour() -> u32 {
    23
}

fn default_end_minute() -> u32 {
    59
}

fn default_days_of_week() -> u8 {
    0x7F
}

impl Default for TimeRestrictions {
    fn default() -> Self {
        Self {
            start_hour: 0,
            start_minute: 0,
            end_hour: default_end_hour(),
            end_minute: default_end_minute(),
            days_of_week: default_days_of_week(),
            process_after_secs: 0,
        }
    }
}

impl TimeRestrictions {
    fn start_minute_of_day(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    fn end_minute_of_day(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    fn day_admitted(&self, day_bit: u32) -> bool {
        self.days_of_week & (1 << day_bit) != 0
    }

    /// Whether `now` falls inside the admission window.
    ///
    /// A window whose start is after its end wraps past midnight
    /// (22:00-06:00 admits late evening and early morning).
    pub fn admits(&self, now: NaiveDateTime) -> bool {
        if !self.day_admitted(now.weekday().num_days_from_monday()) {
            return false;
        }
        let minute = now.hour() * 60 + now.minute();
        let (start, end) = (self.start_minute_of_day(), self.end_minute_of_day());
        if start <= end {
            minute >= start && minute <= end
        } else {
            minute >= start || minute <= end
        }
    }

    /// Seconds until the next admitting instant, 0 when already admitted.
    ///
    /// Searches at most eight days ahead; an all-zero day mask never
    /// admits and returns `None`.
    pub fn seconds_until_admitted(&self, now: NaiveDateTime) -> Option<u64> {
        if self.days_of_week & 0x7F == 0 {
            return None;
        }
        if self.admits(now) {
            return Some(0);
        }
        let start = self.start_minute_of_day();
        for day_offset in 0..=7i64 {
            let date = now.date() + chrono::Duration::days(day_offset);
            let day_bit = date.weekday().num_days_from_monday();
            if !self.day_admitted(day_bit) {
                continue;
            }
            let candidate = date.and_hms_opt(start / 60, start % 60, 0)?;
            if candidate > now {
                return Some((candidate - now).num_seconds().max(0) as u64);
            }
        }
        None
    }
}

/// Retry and pacing knobs for the processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Probe for exclusive access before acting.
    #[serde(default)]
    pub check_in_use: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Sleep between files accepted for this rule.
    #[serde(default)]
    pub delay_next_file_secs: u64,
    /// Debounce window per (rule, path) pair.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_cooldown() -> u64 {
    30
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            check_in_use: false,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            delay_next_file_secs: 0,
            cooldown_secs: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_rule_enabled")]
    pub enabled: bool,
    pub mode: WatchMode,
    /// Absolute directory path, or a regex over directories beneath the
    /// scan root in pattern mode.
    pub directory: String,
    /// Filename regex.
    pub file_pattern: String,
    /// Optional regex matched against a bounded prefix of file content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_pattern: Option<String>,
    #[serde(default)]
    pub operations: RuleOperations,
    #[serde(default)]
    pub hooks: RuleHooks,
    #[serde(default)]
    pub time_restrictions: TimeRestrictions,
    #[serde(default)]
    pub processing: ProcessingOptions,
}

fn default_rule_enabled() -> bool {
    true
}

/// Named load-time rejection reasons for rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {rule}: absolute mode requires an absolute directory, got {directory}")]
    RelativeDirectory { rule: String, directory: String },

    #[error("rule {rule}: invalid {field} regex: {source}")]
    InvalidRegex {
        rule: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

impl WatcherRule {
    /// Validate the pieces that can be checked without touching the
    /// file system: directory shape and regex syntax.
    pub fn validate(&self) -> Result<(), RuleError> {
        match self.mode {
            WatchMode::Absolute => {
                if !Path::new(&self.directory).is_absolute() {
                    return Err(RuleError::RelativeDirectory {
                        rule: self.id.clone(),
                        directory: self.directory.clone(),
                    });
                }
            }
            WatchMode::Pattern => {
                regex::Regex::new(&self.directory).map_err(|source| {
                    RuleError::InvalidRegex { rule: self.id.clone(), field: "directory", source }
                })?;
            }
        }
        regex::Regex::new(&self.file_pattern).map_err(|source| RuleError::InvalidRegex {
            rule: self.id.clone(),
            field: "filePattern",
            source,
        })?;
        if let Some(content) = &self.content_pattern {
            regex::Regex::new(content).map_err(|source| RuleError::InvalidRegex {
                rule: self.id.clone(),
                field: "contentPattern",
                source,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rule_tests.rs"]
mod tests;
