// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller lifecycle: configuration, startup, single-instance lock.

use crate::alerts::{AlertError, AlertSink};
use crate::gitstore::{ConfigStore, GitError};
use crate::hub::{Hub, DEFAULT_HEARTBEAT};
use crate::registry::{Registry, RegistryError};
use crate::server::AppState;
use crate::tokens::{TokenError, TokenService};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/convoyd)
    pub state_dir: PathBuf,
    /// Config repository working tree
    pub repo_dir: PathBuf,
    /// Path to the registry state file
    pub registry_path: PathBuf,
    /// Path to the token state file
    pub tokens_path: PathBuf,
    /// Path to the alert state file
    pub alerts_path: PathBuf,
    /// Path to the lock/PID file
    pub lock_path: PathBuf,
    /// Control-channel listen address
    pub hub_addr: SocketAddr,
    /// HTTP listen address (admin API + Git + proxy)
    pub http_addr: SocketAddr,
    /// Heartbeat interval T_h
    pub heartbeat_interval: Duration,
    /// Git subprocess timeout T_git
    pub git_timeout: Duration,
    /// Pull-through proxy timeout T_proxy
    pub proxy_timeout: Duration,
}

impl Config {
    pub fn load(
        state_dir: Option<PathBuf>,
        hub_addr: SocketAddr,
        http_addr: SocketAddr,
    ) -> Result<Self, LifecycleError> {
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        Ok(Self {
            repo_dir: state_dir.join("config-repo"),
            registry_path: state_dir.join("registry.json"),
            tokens_path: state_dir.join("tokens.json"),
            alerts_path: state_dir.join("alerts.json"),
            lock_path: state_dir.join("convoyd.pid"),
            hub_addr,
            http_addr,
            heartbeat_interval: DEFAULT_HEARTBEAT,
            git_timeout: Duration::from_secs(10),
            proxy_timeout: Duration::from_secs(15),
            state_dir,
        })
    }
}

fn default_state_dir() -> Result<PathBuf, LifecycleError> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("convoyd"))
        .ok_or(LifecycleError::NoStateDir)
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot determine a state directory")]
    NoStateDir,

    #[error("another convoyd instance holds {0}")]
    AlreadyRunning(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("token store: {0}")]
    Tokens(#[from] TokenError),

    #[error(transparent)]
    Alerts(#[from] AlertError),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Running controller state.
pub struct ControllerState {
    pub config: Config,
    // NOTE(lifetime): held to maintain the exclusive instance lock;
    // released on drop.
    #[allow(dead_code)]
    lock_file: File,
    pub hub: Hub,
    pub app_state: Arc<AppState>,
}

/// Open stores, take the instance lock, initialize the config repo, and
/// assemble the hub + HTTP state.
pub async fn startup(config: Config) -> Result<ControllerState, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&config.lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(LifecycleError::AlreadyRunning(config.lock_path.clone()));
    }

    let registry = Arc::new(Registry::open(config.registry_path.clone())?);
    let tokens = Arc::new(TokenService::open(config.tokens_path.clone())?);
    let alerts = Arc::new(AlertSink::open(config.alerts_path.clone())?);
    let store = Arc::new(ConfigStore::new(config.repo_dir.clone(), config.git_timeout));
    store.init().await?;

    let hub = Hub::new(
        Arc::clone(&registry),
        Arc::clone(&tokens),
        Arc::clone(&alerts),
        Arc::clone(&store),
        config.heartbeat_interval,
    );
    let app_state = Arc::new(AppState::new(
        registry,
        tokens,
        alerts,
        store,
        hub.clone(),
        config.proxy_timeout,
    ));

    tracing::info!(
        state_dir = %config.state_dir.display(),
        agents = app_state.registry.list().len(),
        "controller state loaded"
    );

    Ok(ControllerState { config, lock_file, hub, app_state })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
