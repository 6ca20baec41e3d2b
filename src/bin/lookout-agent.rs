//! Lookout agent - finds the monitor on the LAN and streams on request
//!
//! # Usage
//!
//! ```bash
//! # Broadcast discovery on the default port, name from $USER
//! lookout-agent --capture-file /run/user/1000/screen.jpg
//!
//! # Known monitor, fixed name
//! lookout-agent --port 5353 --target 192.168.1.10:5353 --name alice \
//!     --capture-file screen.jpg
//! ```
//!
//! The capture file is re-read on every tick while the monitor streams from
//! this station; keep it updated with any screenshot tool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookout_agent::{Agent, FileCapture, LogNotice, SystemIdentity};
use lookout_core::{LookoutConfig, Overrides};

/// Lookout agent - LAN screen monitor station client
#[derive(Parser, Debug)]
#[command(name = "lookout-agent", version, about)]
struct Args {
    /// Config file (default: $LOOKOUT_CONFIG, then ~/.config/lookout/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shared port of the monitor
    #[arg(short, long)]
    port: Option<u16>,

    /// Name shown on the monitor (default: agent.display_name, then login name)
    #[arg(short, long)]
    name: Option<String>,

    /// Encoded image re-read for every frame
    #[arg(long, default_value = "screen.jpg")]
    capture_file: PathBuf,

    /// Send discovery here instead of broadcasting (repeatable)
    #[arg(short, long = "target")]
    targets: Vec<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lookout_agent=info".parse()?)
                .add_directive("lookout_core=info".parse()?)
                .add_directive("lookout_protocol=info".parse()?),
        )
        .init();

    let mut config =
        LookoutConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(Overrides {
        port: args.port,
        display_name: args.name,
        discovery_targets: args.targets,
    });
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.network.port,
        capture = %args.capture_file.display(),
        "Lookout agent starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let agent = Agent::bind(
        &config,
        &SystemIdentity,
        Arc::new(FileCapture::new(args.capture_file)),
        Arc::new(LogNotice),
        cancel_token,
    )
    .await
    .context("Failed to start agent")?;

    agent.run().await;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
