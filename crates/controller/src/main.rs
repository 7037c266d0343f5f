// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! convoyd: the Convoy controller daemon.

use clap::Parser;
use convoy_controller::lifecycle::{self, Config};
use convoy_controller::server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "convoyd", about = "Convoy fleet controller", version)]
struct Args {
    /// State directory (registry, tokens, alerts, config repo)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Control-channel listen address
    #[arg(long, default_value = "0.0.0.0:7770")]
    hub_addr: SocketAddr,

    /// HTTP listen address (admin API, Git transport, proxy)
    #[arg(long, default_value = "0.0.0.0:7780")]
    http_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "controller failed");
            eprintln!("convoyd: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args.state_dir, args.hub_addr, args.http_addr)?;
    let state = lifecycle::startup(config).await?;

    let cancel = CancellationToken::new();

    let hub_listener = tokio::net::TcpListener::bind(state.config.hub_addr).await?;
    tracing::info!(addr = %state.config.hub_addr, "control channel bound");
    let hub_task = tokio::spawn(state.hub.clone().run(hub_listener, cancel.child_token()));

    let http_listener = tokio::net::TcpListener::bind(state.config.http_addr).await?;
    tracing::info!(addr = %state.config.http_addr, "http server bound");
    let app = server::router(state.app_state);
    let http_cancel = cancel.child_token();
    let http_task = tokio::spawn(async move {
        let shutdown = async move { http_cancel.cancelled().await };
        if let Err(e) = axum::serve(http_listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "http server failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    let _ = hub_task.await;
    let _ = http_task.await;
    tracing::info!("controller stopped");
    Ok(())
}
