// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! convoy-agent: the per-host executor process.

use clap::Parser;
use convoy_agent::gitsync::GitSync;
use convoy_agent::identity::Identity;
use convoy_agent::localcfg::{Layout, LocalSettings};
use convoy_agent::runtime::{self, BootArgs};
use convoy_core::LogLevel;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "convoy-agent", about = "Convoy fleet agent", version)]
struct Args {
    /// Agent data directory (config.json, keys, config repo, journal, log)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Controller control-channel URL, e.g. ws://controller:7770
    #[arg(long)]
    controller_url: Option<String>,

    /// Controller HTTP URL for the Git transport, e.g. http://controller:7780
    #[arg(long)]
    controller_api_url: Option<String>,

    /// Registration token for first-run bootstrap
    #[arg(long)]
    token: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Run without a controller: no channel, no Git sync, no heartbeats
    #[arg(long)]
    standalone: bool,

    /// Commit and push local config changes, then exit
    #[arg(long)]
    push_config: bool,

    /// Report uncommitted local config changes, then exit
    #[arg(long)]
    check_changes: bool,

    /// List automatic backup branches, then exit
    #[arg(long)]
    list_backups: bool,

    /// Restore a backup branch ("latest" or a name) into the working
    /// tree, then exit
    #[arg(long, value_name = "NAME")]
    recover_backup: Option<String>,

    /// Merge a backup branch into the working tree, then exit
    #[arg(long, value_name = "NAME")]
    merge_config: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("convoy-agent: runtime init failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("convoy-agent: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = match args.data_dir.clone() {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let layout = Layout::new(data_dir);
    std::fs::create_dir_all(&layout.data_dir)?;

    let mut settings = LocalSettings::load(&layout.local_config())?;
    let mut settings_changed = false;
    if let Some(url) = args.controller_url.clone() {
        settings.controller_ws_url = Some(url);
        settings_changed = true;
    }
    if let Some(url) = args.controller_api_url.clone() {
        settings.controller_http_url = Some(url);
        settings_changed = true;
    }
    if settings_changed {
        settings.save(&layout.local_config())?;
    }

    let log_level = match args.log_level.as_deref() {
        Some(raw) => Some(raw.parse::<LogLevel>()?),
        None => None,
    };

    if args.push_config
        || args.check_changes
        || args.list_backups
        || args.recover_backup.is_some()
        || args.merge_config.is_some()
    {
        return one_shot(&args, &layout, &settings).await;
    }

    runtime::run(BootArgs {
        layout,
        settings,
        token: args.token,
        standalone: args.standalone,
        log_level,
    })
    .await?;
    Ok(())
}

/// Git maintenance verbs that run against the local working tree and
/// exit.
async fn one_shot(
    args: &Args,
    layout: &Layout,
    settings: &LocalSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let sync = make_gitsync(layout, settings)?;

    if args.check_changes {
        let changes = sync.check_changes().await?;
        if changes.is_empty() {
            println!("no local config changes");
        } else {
            println!("{changes}");
        }
        return Ok(());
    }
    if args.push_config {
        sync.push().await?;
        println!("local config changes pushed");
        return Ok(());
    }
    if args.list_backups {
        let backups = sync.list_backups().await?;
        if backups.is_empty() {
            println!("no backups");
        } else {
            for backup in backups {
                println!("{backup}");
            }
        }
        return Ok(());
    }
    if let Some(name) = &args.recover_backup {
        let restored = sync.recover_backup(name).await?;
        println!("restored {restored} into the working tree");
        return Ok(());
    }
    if let Some(name) = &args.merge_config {
        sync.merge_backup(name).await?;
        println!("merged {name}");
        return Ok(());
    }
    Ok(())
}

fn make_gitsync(
    layout: &Layout,
    settings: &LocalSettings,
) -> Result<GitSync, Box<dyn std::error::Error>> {
    let agent_id = settings
        .agent_id
        .clone()
        .ok_or("agent is not registered yet (no agent id in config.json)")?;
    let base = settings
        .controller_http_url
        .clone()
        .ok_or("no controller HTTP URL configured (--controller-api-url)")?;
    let (identity, _) = Identity::load_or_generate(&layout.key())?;
    Ok(GitSync::new(
        layout.repo(),
        format!("{}/config.git", base.trim_end_matches('/')),
        Arc::new(identity),
        agent_id,
        Duration::from_secs(10),
    ))
}

fn default_data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("convoy-agent"))
        .ok_or_else(|| "cannot determine a data directory; pass --data-dir".into())
}
