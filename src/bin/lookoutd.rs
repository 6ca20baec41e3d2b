//! Lookout monitor - discovers agents and shows the selected agent's screen
//!
//! Listens for agent data connections and answers discovery/heartbeat
//! datagrams on one port, then takes operator commands from stdin.
//!
//! # Usage
//!
//! ```bash
//! # Default port (53), frames discarded
//! lookoutd
//!
//! # Unprivileged port, latest frame kept in a file for a viewer
//! lookoutd --port 5353 --frame-out /tmp/lookout/current.jpg
//! ```
//!
//! Type `list`, `select <id>`, `toggle`, `notice <text>` or `quit` once it
//! is running.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookout_core::{LookoutConfig, Overrides};
use lookoutd::console::{spawn_stdin_source, CommandDispatcher};
use lookoutd::display::{FileSink, NullSink};
use lookoutd::Monitor;

/// Queued operator commands before the stdin reader waits.
const CONSOLE_QUEUE_LEN: usize = 32;

/// Lookout monitor - LAN screen monitor station
#[derive(Parser, Debug)]
#[command(name = "lookoutd", version, about)]
struct Args {
    /// Config file (default: $LOOKOUT_CONFIG, then ~/.config/lookout/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shared port for data connections and discovery
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Keep the latest frame in this file (removed when streaming stops)
    #[arg(long)]
    frame_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lookoutd=info".parse()?)
                .add_directive("lookout_core=info".parse()?)
                .add_directive("lookout_protocol=info".parse()?),
        )
        .init();

    let mut config =
        LookoutConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(Overrides {
        port: args.port,
        ..Overrides::default()
    });
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.network.port,
        "Lookout monitor starting"
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

    let monitor = match args.frame_out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            info!(path = %path.display(), "Writing frames to file");
            Monitor::start(&config, args.bind, FileSink::new(path), cancel_token.clone()).await
        }
        None => Monitor::start(&config, args.bind, NullSink, cancel_token.clone()).await,
    }
    .context("Failed to start monitor")?;

    println!(
        "Listening on {}. Commands: list, select <id>, toggle, notice <text>, quit",
        monitor.local_addr()
    );

    let (command_tx, command_rx) = mpsc::channel(CONSOLE_QUEUE_LEN);
    let (feedback_tx, mut feedback_rx) = mpsc::unbounded_channel::<String>();

    let _stdin = spawn_stdin_source(command_tx, feedback_tx.clone(), cancel_token.clone());
    let dispatcher = CommandDispatcher::new(
        monitor.registry().clone(),
        command_rx,
        feedback_tx,
        cancel_token.clone(),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run());

    tokio::spawn(async move {
        while let Some(line) = feedback_rx.recv().await {
            println!("{line}");
        }
    });

    cancel_token.cancelled().await;
    monitor.shutdown().await;
    if let Err(e) = dispatcher_task.await {
        error!(error = %e, "Command dispatcher ended abnormally");
    }

    info!("Lookout monitor stopped");
    // The blocking stdin read cannot be cancelled and would hold the runtime open.
    process::exit(0)
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
