//! teebroker Daemon
//!
//! Mediates access to the secure-object registry for local clients.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use teebroker_daemon::config::DaemonConfig;
use teebroker_daemon::metrics;

/// teebroker Daemon - secure-object registry broker
#[derive(Parser, Debug)]
#[command(name = "teebrokerd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "teebrokerd.toml")]
    config: String,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Overlay configuration merged over the main file (repeatable)
    #[arg(long)]
    overlay: Vec<String>,

    /// Override the listening endpoint
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("teebroker Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = DaemonConfig::load_or_default(&args.config).await?;
    for overlay in &args.overlay {
        config.load_merge(overlay).await?;
        info!("Merged configuration overlay {}", overlay);
    }
    if let Some(endpoint) = args.endpoint {
        config.server.endpoint = endpoint;
    }
    info!("Loaded configuration from {}", args.config);

    // Start metrics server
    let metrics_handle = metrics::start_server(&config.monitoring);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = teebroker_daemon::run(&config, shutdown_rx).await;

    // Cleanup
    metrics_handle.abort();

    result
}
