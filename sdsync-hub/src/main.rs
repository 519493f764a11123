//! sdsync-hub - Session sync hub
//!
//! Serves the WebSocket session channel, the SSE notification feed and the
//! session HTTP API.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sdsync_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use sdsync_hub::config::CONFIG_FILE_NAME;
use sdsync_hub::reaper::spawn_reaper;
use sdsync_hub::{build_router, AppState, HubConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for sdsync-hub
#[derive(Parser, Debug)]
#[command(name = "sdsync-hub")]
#[command(about = "Session sync hub: shared playback timelines for listener devices")]
#[command(version)]
struct Args {
    /// Path to hub.toml
    #[arg(short, long, env = "SDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "SDSYNC_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR, CONFIG_FILE_NAME);
    let mut config = HubConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(args.port, args.bind, args.log_level);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Log build identification immediately after tracing init
    info!(
        "Starting sdsync-hub v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) if path.exists() => info!("Configuration: {}", path.display()),
        Some(path) => info!("Configuration: built-in defaults ({} not found)", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    info!("Catalog: {} program(s)", config.programs.len());

    let addr = config.listen_addr();
    let state = AppState::new(config);
    let reaper = spawn_reaper(
        state.hub.clone(),
        state.config.reaper_interval(),
        state.config.idle_timeout(),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("sdsync-hub listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reaper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
