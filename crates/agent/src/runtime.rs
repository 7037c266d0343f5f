// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runtime: builds the dependency graph at startup and reacts to
//! controller commands.
//!
//! Subsystems are constructed once and handed their dependencies; no
//! implicit globals beyond the tracing subscriber. Reloads rebuild the
//! watcher and scheduler from the current config document; in-flight
//! workflow executions are never cancelled by a reload. Shutdown
//! cancels the task tree and waits out a grace period.

use crate::api::{self, ApiState};
use crate::channel::{self, ChannelConfig, ChannelEvent};
use crate::executor::{Executor, WorkflowTable};
use crate::gitsync::{GitSync, PullOutcome};
use crate::identity::{Identity, IdentityError};
use crate::journal::Journal;
use crate::localcfg::{Layout, LocalSettings};
use crate::logging::{self, LevelHandle, LoggingError, RollingWriter, RotationLimits};
use crate::outbound::OutboundHandle;
use crate::scheduler::{self, SchedulerHandle};
use crate::watcher::{self, PipelineDeps, WatcherHandle};
use convoy_core::fsjson::PersistError;
use convoy_core::{AgentConfig, AgentId, AlertLevel, LogLevel};
use convoy_wire::Command;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shutdown grace period for in-flight work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Git operation timeout T_git.
const GIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("another agent instance holds the lock")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("local API bind failed: {0}")]
    ApiBind(std::io::Error),
}

#[derive(Debug)]
pub struct BootArgs {
    pub layout: Layout,
    pub settings: LocalSettings,
    pub token: Option<String>,
    pub standalone: bool,
    pub log_level: Option<LogLevel>,
}

pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub fn platform() -> String {
    format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH)
}

struct AgentRuntime {
    layout: Layout,
    settings: LocalSettings,
    identity: Arc<Identity>,
    agent_id: Arc<Mutex<Option<AgentId>>>,
    config: Arc<RwLock<AgentConfig>>,
    workflows: Arc<WorkflowTable>,
    executor: Executor,
    outbound: OutboundHandle,
    level_handle: LevelHandle,
    log_writer: RollingWriter,
    gitsync: Option<Arc<GitSync>>,
    watcher: Option<WatcherHandle>,
    scheduler: Option<SchedulerHandle>,
    cancel: CancellationToken,
}

/// Run the agent daemon until a shutdown signal.
pub async fn run(args: BootArgs) -> Result<(), RuntimeError> {
    let layout = args.layout;
    std::fs::create_dir_all(&layout.data_dir)?;

    // Single instance per data dir.
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(layout.lock())?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(RuntimeError::AlreadyRunning);
    }

    let mut settings = args.settings;
    let agent_id = Arc::new(Mutex::new(settings.agent_id.clone()));

    // The Git-synced config document drives everything else.
    let initial_config = load_config_document(&layout, &settings.agent_id);
    let mut log_settings = initial_config.log_settings.clone();
    if let Some(level) = args.log_level {
        log_settings.level = level;
    }
    let (level_handle, log_writer) = logging::init(layout.log(), &log_settings)?;
    tracing::info!(
        version = VERSION,
        data_dir = %layout.data_dir.display(),
        standalone = args.standalone,
        "agent starting"
    );

    let (identity, generated) = Identity::load_or_generate(&layout.key())?;
    let identity = Arc::new(identity);
    if generated {
        tracing::info!("new identity generated; registration required");
    }

    let journal = Arc::new(Journal::open(layout.journal())?);
    match journal.repair_interrupted() {
        Ok(0) => {}
        Ok(repaired) => tracing::warn!(repaired, "interrupted executions reclassified"),
        Err(e) => tracing::error!(error = %e, "journal repair failed"),
    }
    let (journal_tx, _journal_writer) = crate::journal::spawn_writer(Arc::clone(&journal));

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let outbound = OutboundHandle::new(outbound_tx);
    let executor = Executor::new(journal_tx, outbound.clone());
    let workflows = Arc::new(WorkflowTable::new());
    let config = Arc::new(RwLock::new(initial_config));

    let cancel = CancellationToken::new();

    let mut runtime = AgentRuntime {
        gitsync: make_gitsync(&layout, &settings, &agent_id.lock(), &identity),
        layout,
        settings: settings.clone(),
        identity: Arc::clone(&identity),
        agent_id: Arc::clone(&agent_id),
        config: Arc::clone(&config),
        workflows: Arc::clone(&workflows),
        executor: executor.clone(),
        outbound: outbound.clone(),
        level_handle: level_handle.clone(),
        log_writer,
        watcher: None,
        scheduler: None,
        cancel: cancel.clone(),
    };
    runtime.reload_subsystems().await;

    // Local query API.
    let api_state = Arc::new(ApiState {
        agent_id: Arc::clone(&agent_id),
        hostname: hostname(),
        platform: platform(),
        version: VERSION,
        public_key_pem: identity.public_key_pem().to_string(),
        data_dir: runtime.layout.data_dir.clone(),
        log_path: runtime.layout.log(),
        config: Arc::clone(&config),
        workflows: Arc::clone(&workflows),
        journal: Arc::clone(&journal),
        level: level_handle.clone(),
    });
    let api_router = api::router(api_state, settings.cors_allowed_origin.as_deref());
    let api_addr = format!("{}:{}", settings.api_bind, settings.api_port);
    let api_listener =
        tokio::net::TcpListener::bind(&api_addr).await.map_err(RuntimeError::ApiBind)?;
    tracing::info!(addr = %api_addr, "local query API bound");
    let api_cancel = cancel.child_token();
    let api_task = tokio::spawn(async move {
        let shutdown = async move { api_cancel.cancelled().await };
        if let Err(e) = axum::serve(api_listener, api_router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "local API server failed");
        }
    });

    // Control channel (disabled in standalone mode, like Git sync and
    // heartbeats).
    let (events_tx, mut events_rx) = mpsc::channel::<ChannelEvent>(32);
    let mut channel_task = None;
    if args.standalone {
        tracing::info!("standalone mode: control channel and config sync disabled");
        // Outbound alerts have nowhere to go; drain them.
        let mut rx = outbound_rx;
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
    } else if let Some(ws_url) = settings.controller_ws_url.clone() {
        let channel_config = ChannelConfig {
            ws_url,
            token: args.token,
            hostname: hostname(),
            platform: platform(),
            api_port: settings.api_port,
            heartbeat: channel::DEFAULT_HEARTBEAT,
            backoff_max: channel::DEFAULT_BACKOFF_MAX,
        };
        channel_task = Some(tokio::spawn(channel::run(
            channel_config,
            Arc::clone(&identity),
            Arc::clone(&agent_id),
            outbound_rx,
            events_tx,
            cancel.child_token(),
        )));
    } else {
        tracing::warn!("no controller URL configured; running detached");
        let mut rx = outbound_rx;
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
    }

    // Event loop: channel events and shutdown.
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "signal handler failed");
                }
                tracing::info!("shutdown signal received");
                break;
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                runtime.handle_channel_event(event, &mut settings).await;
            }
        }
    }

    cancel.cancel();
    let teardown = async {
        if let Some(watcher) = runtime.watcher.take() {
            watcher.stop().await;
        }
        if let Some(scheduler) = runtime.scheduler.take() {
            scheduler.stop().await;
        }
        if let Some(task) = channel_task {
            let _ = task.await;
        }
        let _ = api_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, teardown).await.is_err() {
        tracing::warn!("grace period elapsed; forcing shutdown");
    }
    tracing::info!("agent stopped");
    Ok(())
}

/// Read `agents/<id>.json` from the working tree; defaults when absent
/// or unreadable (the rest of the table stays active on bad documents).
fn load_config_document(layout: &Layout, agent_id: &Option<AgentId>) -> AgentConfig {
    let Some(id) = agent_id else { return AgentConfig::default() };
    let path = layout.agent_document(id);
    match std::fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "config document invalid; keeping defaults");
                AgentConfig::default()
            }
        },
        Err(_) => AgentConfig::default(),
    }
}

fn make_gitsync(
    layout: &Layout,
    settings: &LocalSettings,
    agent_id: &Option<AgentId>,
    identity: &Arc<Identity>,
) -> Option<Arc<GitSync>> {
    let id = agent_id.clone()?;
    let base = settings.controller_http_url.clone()?;
    Some(Arc::new(GitSync::new(
        layout.repo(),
        format!("{}/config.git", base.trim_end_matches('/')),
        Arc::clone(identity),
        id,
        GIT_TIMEOUT,
    )))
}

impl AgentRuntime {
    async fn handle_channel_event(&mut self, event: ChannelEvent, settings: &mut LocalSettings) {
        match event {
            ChannelEvent::Registered(id) => {
                settings.agent_id = Some(id.clone());
                self.settings.agent_id = Some(id.clone());
                if let Err(e) = settings.save(&self.layout.local_config()) {
                    tracing::error!(error = %e, "persisting assigned id failed");
                }
                self.gitsync =
                    make_gitsync(&self.layout, &self.settings, &Some(id), &self.identity);
                self.sync_and_reload().await;
            }
            ChannelEvent::Connected => {
                // Catch up on anything missed while offline.
                self.sync_and_reload().await;
            }
            ChannelEvent::Command(command) => self.handle_command(command).await,
            ChannelEvent::Disconnected => {}
            ChannelEvent::AuthFailed => {
                tracing::error!("controller rejected credentials; config sync is inactive");
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ReloadConfig | Command::GitPull => self.sync_and_reload().await,
            Command::ReloadFilewatcher => self.restart_watcher().await,
            Command::RemoveWorkflow { workflow_id } => {
                if self.workflows.remove(&workflow_id) {
                    tracing::info!(workflow = %workflow_id, "workflow removed");
                    self.restart_scheduler().await;
                } else {
                    tracing::warn!(workflow = %workflow_id, "remove-workflow: not loaded");
                }
            }
            Command::SetLogLevel { level } => match self.level_handle.set(level) {
                Ok(old_level) => {
                    tracing::info!(oldLevel = %old_level, newLevel = %level, "log level changed by controller");
                }
                Err(e) => tracing::error!(error = %e, "log level change failed"),
            },
        }
    }

    /// Pull the config repo and reload affected subsystems.
    async fn sync_and_reload(&mut self) {
        if let Some(gitsync) = self.gitsync.clone() {
            match gitsync.pull().await {
                Ok(PullOutcome::Diverged { backup_branch }) => {
                    self.report_divergence(&backup_branch);
                }
                Ok(outcome) => {
                    tracing::debug!(?outcome, "config pull finished");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config pull failed");
                }
            }
        }

        let loaded = load_config_document(&self.layout, &self.agent_id.lock().clone());
        *self.config.write() = loaded;
        self.reload_subsystems().await;
    }

    fn report_divergence(&self, backup_branch: &str) {
        let mut fields = serde_json::Map::new();
        fields.insert("condition".to_string(), json!("git-divergence"));
        fields.insert("backupBranch".to_string(), json!(backup_branch));
        self.outbound.send_status(fields.clone());
        self.outbound.send_alert(
            AlertLevel::Warning,
            format!("configuration diverged; local changes parked on {backup_branch}"),
            Some(fields),
        );
    }

    /// Re-index workflows, restart the watcher and scheduler, and apply
    /// log settings in place. In-flight executions continue untouched.
    async fn reload_subsystems(&mut self) {
        let config = self.config.read().clone();

        let rejected = self.workflows.reload(&config.workflows);
        for (workflow_id, reason) in rejected {
            self.outbound.send_alert(
                AlertLevel::Error,
                format!("workflow {workflow_id} rejected: {reason}"),
                None,
            );
        }

        if self.level_handle.current() != config.log_settings.level {
            match self.level_handle.set(config.log_settings.level) {
                Ok(old_level) => {
                    tracing::info!(oldLevel = %old_level, newLevel = %config.log_settings.level, "log level from config");
                }
                Err(e) => tracing::error!(error = %e, "config log level failed"),
            }
        }
        self.log_writer.update_limits(RotationLimits::from(&config.log_settings));

        self.restart_watcher().await;
        self.restart_scheduler().await;
    }

    async fn restart_watcher(&mut self) {
        if let Some(old) = self.watcher.take() {
            old.stop().await;
        }
        let config = self.config.read().clone();
        let deps = PipelineDeps {
            executor: self.executor.clone(),
            workflows: Arc::clone(&self.workflows),
            outbound: self.outbound.clone(),
        };
        match watcher::spawn(
            &config.file_watcher_settings,
            &config.file_watcher_rules,
            &self.workflows.list(),
            deps,
            &self.cancel,
        ) {
            Ok(handle) => self.watcher = Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "file watcher failed to start");
                self.outbound.send_alert(
                    AlertLevel::Error,
                    format!("file watcher failed to start: {e}"),
                    None,
                );
            }
        }
    }

    async fn restart_scheduler(&mut self) {
        if let Some(old) = self.scheduler.take() {
            old.stop().await;
        }
        let workflows = self.workflows.list();
        self.scheduler =
            Some(scheduler::spawn(&workflows, self.executor.clone(), &self.cancel));
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
