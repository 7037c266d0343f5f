// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured logging with size-based rotation.
//!
//! The log stream is JSON lines written through a rolling writer: when
//! the file reaches the configured size, the next append renames it to a
//! timestamped sibling (optionally gzipped) and starts fresh. Rotation
//! holds the writer lock, so no line is ever split across files. The
//! runtime level is adjustable through a reload handle, both from the
//! `set-log-level` command and the local API.

use chrono::Local;
use convoy_core::{LogLevel, LogSettings};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("subscriber init failed: {0}")]
    Init(String),
    #[error("level reload failed: {0}")]
    Reload(String),
}

/// Rotation knobs derived from `logSettings`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationLimits {
    pub max_bytes: u64,
    pub max_backups: u32,
    pub max_age_days: u32,
    pub compress: bool,
}

impl From<&LogSettings> for RotationLimits {
    fn from(settings: &LogSettings) -> Self {
        Self {
            max_bytes: settings.max_size_mb * 1024 * 1024,
            max_backups: settings.max_backups,
            max_age_days: settings.max_age_days,
            compress: settings.compress,
        }
    }
}

struct WriterInner {
    path: PathBuf,
    file: File,
    size: u64,
    limits: RotationLimits,
}

/// Size-rotating log file writer. Clones share the same file.
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<WriterInner>>,
}

impl RollingWriter {
    pub fn open(path: PathBuf, limits: RotationLimits) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { inner: Arc::new(Mutex::new(WriterInner { path, file, size, limits })) })
    }

    /// Apply new rotation limits in place (config reload).
    pub fn update_limits(&self, limits: RotationLimits) {
        self.inner.lock().limits = limits;
    }

    pub fn current_size(&self) -> u64 {
        self.inner.lock().size
    }

    fn rotate(inner: &mut WriterInner) -> io::Result<()> {
        inner.file.flush()?;

        let rotated = rotation_target(&inner.path);
        std::fs::rename(&inner.path, &rotated)?;

        if inner.limits.compress {
            compress_file(&rotated)?;
        }
        prune_backups(&inner.path, inner.limits.max_backups, inner.limits.max_age_days);

        inner.file = OpenOptions::new().create(true).append(true).open(&inner.path)?;
        inner.size = 0;
        Ok(())
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.size >= inner.limits.max_bytes && inner.limits.max_bytes > 0 {
            Self::rotate(&mut inner)?;
        }
        let written = inner.file.write(buf)?;
        inner.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

/// `agent.log` → `agent-YYYYMMDD-HHMMSS.log`, suffixed on collision.
fn rotation_target(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");
    let parent = path.parent().unwrap_or(Path::new("."));
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let base = parent.join(format!("{stem}-{stamp}.log"));
    if !base.exists() && !base.with_extension("log.gz").exists() {
        return base;
    }
    for n in 1..1000 {
        let candidate = parent.join(format!("{stem}-{stamp}-{n}.log"));
        if !candidate.exists() && !candidate.with_extension("log.gz").exists() {
            return candidate;
        }
    }
    base
}

fn compress_file(path: &Path) -> io::Result<()> {
    let gz_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".gz");
        PathBuf::from(name)
    };
    let mut input = File::open(path)?;
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    std::fs::remove_file(path)?;
    Ok(())
}

/// Drop rotated files beyond `max_backups` or older than `max_age_days`.
fn prune_backups(active_path: &Path, max_backups: u32, max_age_days: u32) {
    let Some(parent) = active_path.parent() else { return };
    let Some(stem) = active_path.file_stem().and_then(|s| s.to_str()) else { return };
    let prefix = format!("{stem}-");

    let Ok(entries) = std::fs::read_dir(parent) else { return };
    let mut rotated: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    n.starts_with(&prefix) && (n.ends_with(".log") || n.ends_with(".log.gz"))
                })
        })
        .collect();
    // Timestamped names sort chronologically.
    rotated.sort();

    if max_backups > 0 && rotated.len() > max_backups as usize {
        let excess = rotated.len() - max_backups as usize;
        for path in rotated.drain(..excess) {
            let _ = std::fs::remove_file(path);
        }
    }

    if max_age_days > 0 {
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(u64::from(max_age_days) * 86_400);
        for path in rotated {
            let too_old = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);
            if too_old {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Handle for runtime log-level changes.
#[derive(Clone)]
pub struct LevelHandle {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    current: Arc<Mutex<LogLevel>>,
}

impl LevelHandle {
    /// A handle not wired to a subscriber; level is tracked but nothing
    /// reloads. Used when another component owns the global subscriber.
    pub fn detached(level: LogLevel) -> Self {
        Self { handle: None, current: Arc::new(Mutex::new(level)) }
    }

    pub fn current(&self) -> LogLevel {
        *self.current.lock()
    }

    /// Change the runtime level; returns the previous one.
    pub fn set(&self, level: LogLevel) -> Result<LogLevel, LoggingError> {
        if let Some(handle) = &self.handle {
            handle
                .reload(EnvFilter::new(level.as_filter_str()))
                .map_err(|e| LoggingError::Reload(e.to_string()))?;
        }
        let mut current = self.current.lock();
        let old = *current;
        *current = level;
        Ok(old)
    }
}

/// Install the global subscriber: JSON lines into the rolling file, plus
/// human-readable output on stderr.
pub fn init(
    log_path: PathBuf,
    settings: &LogSettings,
) -> Result<(LevelHandle, RollingWriter), LoggingError> {
    let writer = RollingWriter::open(log_path, RotationLimits::from(settings))?;
    let (filter_layer, handle) =
        reload::Layer::new(EnvFilter::new(settings.level.as_filter_str()));

    let file_writer = writer.clone();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(move || file_writer.clone()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    let level_handle =
        LevelHandle { handle: Some(handle), current: Arc::new(Mutex::new(settings.level)) };
    Ok((level_handle, writer))
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
