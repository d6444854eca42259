use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thinbridge_core::config::LogConfig;
use thinbridge_core::{
    BridgeBuilder, BridgeHandle, BridgeMetrics, BroadcastDappBus, ChannelTransport,
    LoggingMetricsBackend, ThinbridgeConfig, classify,
};
use tracing_subscriber::{EnvFilter, fmt};

mod console;
mod container;

use container::Container;

/// Environment variable holding the log filter; overrides `[log] filter`.
const LOG_ENV: &str = "THINBRIDGE_LOG";

#[derive(Parser)]
#[command(
    name = "thinbridge",
    version,
    about = "thinbridge: message bridge between a wallet UI and its runtime container"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spawn the runtime container and bridge console requests to it
    Run {
        /// Path to thinbridge.toml (default: ./thinbridge.toml, then the user config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the routing namespace of a message name
    Classify {
        /// Message name, e.g. "pri(accounts.list)"
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Classify { message } => {
            println!("{}", classify(&message));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays a clean JSON-lines channel.
fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&log.filter));
    if log.json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let user_config_dir = dirs::config_dir();
    let path = ThinbridgeConfig::locate(config_path.as_deref(), user_config_dir.as_deref())
        .context("no thinbridge.toml found; pass --config or create one")?;
    let config = ThinbridgeConfig::from_file(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    init_logging(&config.log);
    tracing::info!(
        config = %path.display(),
        command = %config.container.command,
        "Starting thinbridge host"
    );

    let metrics = Arc::new(BridgeMetrics::with_backend(Arc::new(LoggingMetricsBackend)));
    let dapp_bus = Arc::new(BroadcastDappBus::new(config.bridge.dapp_bus_capacity));
    let (transport, frames) = ChannelTransport::new();

    let bridge = BridgeBuilder::from_config(&config.bridge)
        .transport(Arc::new(transport))
        .dapp_bus(dapp_bus.clone())
        .metrics(Arc::clone(&metrics))
        .build();
    let handle = BridgeHandle::new(bridge);

    // Subscribe before the container starts so its first status frame is seen
    let status = handle.on_status_change().await;
    tokio::spawn(console::forward_dapp_events(dapp_bus.subscribe()));
    tokio::spawn(console::watch_status(
        handle.clone(),
        status,
        config.bridge.replay_on_ready,
    ));

    let mut container = Container::spawn(&config.container, frames, handle.clone())?;

    tokio::select! {
        result = console::run_console(handle.clone()) => {
            result?;
            tracing::info!("Console closed");
        }
        status = container.wait() => {
            let status = status?;
            tracing::warn!(%status, "Container exited");
        }
    }

    tracing::info!(metrics = ?metrics.snapshot(), "thinbridge host shutting down");
    Ok(())
}
