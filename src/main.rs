use std::sync::Arc;

use anyhow::Context;
use cavesync_core::PoseStore;
use cavesync_server::{start, ServerConfig};
use cavesync_tracking::TrackingConfig;
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// Frame-synchronization server for clustered cave displays.
#[derive(Debug, Parser)]
#[command(name = "cavesync", version)]
struct Args {
    /// Port the WebSocket server listens on.
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Frame updates per second.
    #[arg(short = 'r', long, default_value_t = 60.0)]
    update_rate: f64,

    /// Address to receive motion-capture datagrams on. Omit to run without
    /// tracking; clients then get empty pose snapshots.
    #[arg(short, long)]
    tracking: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.update_rate > 0.0, "update rate must be positive");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(PoseStore::new());
    let cancel = CancellationToken::new();

    let tracker = match args.tracking.filter(|addr| !addr.is_empty()) {
        Some(listen_addr) => Some(cavesync_tracking::spawn(
            TrackingConfig { listen_addr },
            Arc::clone(&store),
            cancel.clone(),
        )),
        None => {
            tracing::warn!(
                "no tracking connection specified; use --tracking=addr:port to receive pose data"
            );
            None
        }
    };

    let config = ServerConfig {
        port: args.port,
        update_rate: args.update_rate,
        ..Default::default()
    };
    let handle = start(config, Arc::clone(&store), cancel.clone())
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, rate = args.update_rate, "cavesync ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    // Workers observe the shared token; join them before dropping transport.
    handle.shutdown().await;
    if let Some(tracker) = tracker {
        let _ = tracker.await;
    }

    Ok(())
}
