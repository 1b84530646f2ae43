//! Parley Daemon - real-time voice conversation with a live model
//!
//! Runs in the background holding no devices until asked. A `start` on the
//! control socket opens the microphone, the speaker and a model session;
//! `stop` releases all three. Transcript and state changes are published on
//! the UI event socket.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_audio::{AudioCapture, CpalBackend};
use parley_broadcaster::TranscriptBroadcaster;
use parley_daemon::config::DaemonConfig;
use parley_daemon::conversation::Conversation;
use parley_daemon::ipc::{self, IpcServer};
use parley_daemon::{feed, version};
use parley_session::WebSocketConnector;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley-daemon", version, about = "Real-time voice conversation daemon")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// List audio input devices
    Devices,
    /// Send a control command to a running daemon
    Ctl {
        /// start | stop | toggle | status | transcript | quit
        command: String,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(load_config(cli.config.as_deref())?).await,
        Command::Devices => list_devices(),
        Command::Ctl { command } => {
            let config = load_config(cli.config.as_deref())?;
            let reply =
                ipc::send_command(&config.ipc_socket_path()?, &command, Duration::from_secs(30))
                    .await?;
            println!("{}", reply);
            Ok(())
        }
        Command::Version => {
            print!("{}", version::version_long());
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<DaemonConfig> {
    let config = match path {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;
    Ok(config)
}

fn list_devices() -> Result<()> {
    let devices = AudioCapture::list_devices().context("Failed to enumerate audio devices")?;
    for device in devices {
        println!(
            "{:>3}  {}{}  ({} ch, {} Hz)",
            device.index,
            device.name,
            if device.is_default { " [default]" } else { "" },
            device.max_input_channels,
            device.default_sample_rate,
        );
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> Result<()> {
    info!("Starting {}", version::version_short());
    info!("Configuration loaded from {}", config.config_path.display());
    if config.api_key.is_none() {
        warn!("No API key configured; set PARLEY_API_KEY or api_key in the config file");
    }

    let conversation = Conversation::new(
        CpalBackend,
        WebSocketConnector,
        config.conversation_settings(),
    );

    let broadcaster = Arc::new(TranscriptBroadcaster::new(config.broadcast_socket_path()?));
    broadcaster
        .start()
        .await
        .context("Failed to start UI event socket")?;
    let feed = feed::spawn(Arc::clone(&broadcaster), conversation.subscribe());

    let shutdown = Arc::new(Notify::new());
    let ipc_server = IpcServer::new(
        &config.ipc_socket_path()?,
        conversation.clone(),
        Arc::clone(&shutdown),
    )
    .context("Failed to start IPC server")?;

    info!("Parley daemon ready");
    info!("   Use 'parley-daemon ctl toggle' to start or stop a conversation");

    tokio::select! {
        result = ipc_server.run() => {
            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        }
        _ = shutdown.notified() => {
            info!("Quit requested");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down...");
    conversation.stop();
    // Let the final state change reach UI clients
    tokio::time::sleep(Duration::from_millis(100)).await;
    feed.abort();
    drop(ipc_server);
    if let Err(e) = broadcaster.stop().await {
        warn!("Failed to stop UI event socket: {}", e);
    }
    info!("Parley daemon stopped");

    Ok(())
}
