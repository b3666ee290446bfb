//! Vigil Agent Daemon
//!
//! The agent runs on the administered host and serves an authenticated
//! browser client: live host telemetry and an interactive shell over a
//! WebSocket, plus managed-process control and privileged configuration
//! editing over the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_agent::server;
use vigil_agent::state::AgentState;
use vigil_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "vigil-agent")]
#[command(about = "Vigil host agent - remote administration backend")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Vigil Agent starting...");

    // Load configuration
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        })
    } else {
        tracing::info!("No config file at {:?}, using defaults", config_path);
        AgentConfig::default()
    };

    // Apply command-line overrides
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let state = AgentState::new(config).context("Failed to initialize agent state")?;

    server::serve(Arc::new(state)).await
}
