// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-side of the agent log: parse the JSON-lines stream for the
//! `/logs` endpoint, with level and substring filters plus pagination.

use convoy_core::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::path::Path;

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Structured fields beyond the message.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// A page of log entries, newest first.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub entries: Vec<LogEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

/// Parse one JSON log line; unparseable lines yield `None`.
pub fn parse_line(line: &str) -> Option<LogEntry> {
    let raw: RawLine = serde_json::from_str(line).ok()?;
    let mut fields = raw.fields;
    let message = match fields.remove("message") {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(LogEntry {
        timestamp: raw.timestamp,
        level: raw.level,
        message,
        target: raw.target,
        fields,
    })
}

/// Query the log file: level filter, substring search, pagination.
pub fn query(
    path: &Path,
    page: usize,
    page_size: usize,
    level: Option<LogLevel>,
    search: Option<&str>,
) -> io::Result<LogPage> {
    let content = read_or_empty(path)?;
    let level_tag = level.map(|l| l.as_filter_str().to_ascii_uppercase());

    let matching: Vec<LogEntry> = content
        .lines()
        .rev()
        .filter_map(parse_line)
        .filter(|entry| {
            level_tag
                .as_deref()
                .is_none_or(|tag| entry.level.eq_ignore_ascii_case(tag))
        })
        .filter(|entry| {
            search.is_none_or(|needle| {
                entry.message.contains(needle)
                    || entry
                        .fields
                        .values()
                        .any(|v| v.as_str().is_some_and(|s| s.contains(needle)))
            })
        })
        .collect();

    let total = matching.len();
    let entries = matching
        .into_iter()
        .skip(page.saturating_sub(1) * page_size)
        .take(page_size)
        .collect();
    Ok(LogPage { entries, page, page_size, total })
}

/// Plain-text export of the newest `limit` lines, oldest first.
pub fn tail_plain(path: &Path, limit: usize) -> io::Result<String> {
    let content = read_or_empty(path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].join("\n"))
}

fn read_or_empty(path: &Path) -> io::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "logquery_tests.rs"]
mod tests;
