// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The operation sequence applied to a matched file.
//!
//! Declared order: copy-to (through a temp extension with an atomic
//! rename when configured, optionally inserting a timestamp), backup-to,
//! rename, then source removal (`copyOption: move` or `removeAfter`).
//! The overwrite flag gates replacing existing destinations. Atomicity
//! across the whole sequence is not guaranteed over crashes.

use chrono::Local;
use convoy_core::{CopyOption, RuleOperations};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("source {0} has no file name")]
    NoFileName(PathBuf),

    #[error("destination {0} exists and overwrite is disabled")]
    DestinationExists(PathBuf),

    #[error("{operation} failed for {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the sequence did, for logging and hook context.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OpsOutcome {
    pub destination: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub renamed_to: Option<PathBuf>,
    pub source_removed: bool,
}

/// Insert a timestamp before the extension: `x.csv` → `x-<stamp>.csv`.
pub fn timestamped_name(name: &str, stamp: &str) -> String {
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => format!("{base}-{stamp}.{ext}"),
        _ => format!("{name}-{stamp}"),
    }
}

pub async fn apply(operations: &RuleOperations, source: &Path) -> Result<OpsOutcome, OpsError> {
    let file_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| OpsError::NoFileName(source.to_path_buf()))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut outcome = OpsOutcome::default();
    let mut current: PathBuf = source.to_path_buf();

    if let Some(copy_dir) = &operations.copy_to {
        let dest_name = if operations.insert_timestamp {
            timestamped_name(file_name, &stamp)
        } else {
            file_name.to_string()
        };
        let destination = copy_dir.join(dest_name);
        if destination.exists() && !operations.overwrite {
            return Err(OpsError::DestinationExists(destination));
        }
        create_dir(copy_dir).await?;

        match &operations.temp_extension {
            Some(ext) => {
                // Copy through a temp name, then atomically rename, so
                // downstream pollers never see a half-written file.
                let temp = temp_sibling(&destination, ext);
                copy(&current, &temp).await?;
                rename(&temp, &destination).await?;
            }
            None => copy(&current, &destination).await?,
        }
        outcome.destination = Some(destination);
    }

    if let Some(backup_dir) = &operations.backup_to {
        create_dir(backup_dir).await?;
        let backup = backup_dir.join(file_name);
        copy(&current, &backup).await?;
        outcome.backup = Some(backup);
    }

    if let Some(new_name) = &operations.rename {
        let new_name = if operations.insert_timestamp {
            timestamped_name(new_name, &stamp)
        } else {
            new_name.clone()
        };
        let target = current.with_file_name(new_name);
        if target.exists() && !operations.overwrite {
            return Err(OpsError::DestinationExists(target));
        }
        rename(&current, &target).await?;
        outcome.renamed_to = Some(target.clone());
        current = target;
    }

    if operations.remove_after
        || (operations.copy_option == CopyOption::Move && operations.copy_to.is_some())
    {
        remove(&current).await?;
        outcome.source_removed = true;
    }

    Ok(outcome)
}

fn temp_sibling(destination: &Path, ext: &str) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    if !ext.starts_with('.') {
        name.push(".");
    }
    name.push(ext);
    PathBuf::from(name)
}

async fn create_dir(path: &Path) -> Result<(), OpsError> {
    tokio::fs::create_dir_all(path).await.map_err(|source| OpsError::Io {
        operation: "create directory",
        path: path.display().to_string(),
        source,
    })
}

async fn copy(from: &Path, to: &Path) -> Result<(), OpsError> {
    tokio::fs::copy(from, to).await.map(|_| ()).map_err(|source| OpsError::Io {
        operation: "copy",
        path: from.display().to_string(),
        source,
    })
}

async fn rename(from: &Path, to: &Path) -> Result<(), OpsError> {
    tokio::fs::rename(from, to).await.map_err(|source| OpsError::Io {
        operation: "rename",
        path: from.display().to_string(),
        source,
    })
}

async fn remove(path: &Path) -> Result<(), OpsError> {
    tokio::fs::remove_file(path).await.map_err(|source| OpsError::Io {
        operation: "remove",
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod tests;
