//! sdsync-listen - Headless session listener
//!
//! Joins one session through the resilience layer with a logging-only audio
//! engine and reports every client state change. Useful for checking a hub
//! from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sdsync_client::config::CONFIG_FILE_NAME;
use sdsync_client::engine::{LoggingEngine, SilentPlatform};
use sdsync_client::{ClientConfig, ClientState, ClientStatus, ResilienceLayer, WsConnector};
use sdsync_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sdsync-listen")]
#[command(about = "Follow a session sync timeline from the terminal")]
#[command(version)]
struct Args {
    /// Hub base URL, e.g. ws://127.0.0.1:5780
    hub_url: String,

    /// Session to join
    session_id: String,

    /// Path to listen.toml
    #[arg(short, long, env = "SDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Run the audio unlock sequence before joining
    #[arg(long)]
    mobile: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR, CONFIG_FILE_NAME);
    let mut config =
        ClientConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    config.hub_url = args.hub_url;
    config.mobile |= args.mobile;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting sdsync-listen v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let connector = Arc::new(WsConnector::new(config.hub_url.clone()));
    let layer = ResilienceLayer::new(
        config,
        LoggingEngine::new(),
        connector,
        Arc::new(SilentPlatform),
    );
    let (client, task) = layer.spawn();
    let mut status = client.subscribe();
    client
        .join(args.session_id)
        .context("Failed to start listener")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut previous = ClientStatus::default();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                report(&previous, &current);
                if current.state == ClientState::Idle && current.session_id.is_none() {
                    info!("Session over");
                    break;
                }
                previous = current;
            }
            _ = &mut shutdown => break,
        }
    }

    // The task may already have stopped; either way wait for its teardown
    let _ = client.shutdown();
    task.await.context("Listener task failed")?;
    Ok(())
}

fn report(previous: &ClientStatus, status: &ClientStatus) {
    info!(
        "{:?} session={} name={} listeners={}{}",
        status.state,
        status.session_id.as_deref().unwrap_or("-"),
        status.display_name.as_deref().unwrap_or("-"),
        status.participant_count,
        if status.slow_load { " (loading slowly)" } else { "" }
    );
    if status.last_error == previous.last_error {
        return;
    }
    if let Some(e) = &status.last_error {
        if e.is_warning() {
            warn!("{}", e);
        } else {
            tracing::error!("{}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, leaving");
}
