//! Unix socket control server
//!
//! One command per connection, one reply, then the connection closes:
//! `start`, `stop`, `toggle`, `status`, `transcript`, `quit`.

use anyhow::{Context, Result};
use parley_audio::AudioBackend;
use parley_session::Connector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::conversation::Conversation;

/// IPC command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcCommand {
    Start,
    Stop,
    Toggle,
    Status,
    Transcript,
    Quit,
}

impl IpcCommand {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "toggle" => Ok(Self::Toggle),
            "status" => Ok(Self::Status),
            "transcript" => Ok(Self::Transcript),
            "quit" | "exit" | "shutdown" => Ok(Self::Quit),
            _ => anyhow::bail!("Unknown command: {}", s.trim()),
        }
    }
}

/// Run one command against the conversation and produce the reply text
pub async fn execute<B: AudioBackend, C: Connector>(
    command: IpcCommand,
    conversation: &Conversation<B, C>,
    shutdown: &Notify,
) -> String {
    match command {
        IpcCommand::Start => start(conversation).await,
        IpcCommand::Stop => {
            if conversation.is_active() {
                conversation.stop();
                "Conversation stopped".to_string()
            } else {
                "No conversation running".to_string()
            }
        }
        IpcCommand::Toggle => {
            if conversation.is_active() {
                conversation.stop();
                "Conversation stopped".to_string()
            } else {
                start(conversation).await
            }
        }
        IpcCommand::Status => {
            let status = conversation.status();
            serde_json::json!({
                "status": status.to_string(),
                "connection": status.connection_state(),
                "session_id": conversation.current_session_id(),
            })
            .to_string()
        }
        IpcCommand::Transcript => match serde_json::to_string(&conversation.transcript()) {
            Ok(json) => json,
            Err(e) => format!("Error: {}", e),
        },
        IpcCommand::Quit => {
            info!("Received quit command");
            conversation.stop();
            shutdown.notify_one();
            "Shutting down".to_string()
        }
    }
}

async fn start<B: AudioBackend, C: Connector>(conversation: &Conversation<B, C>) -> String {
    match conversation.start().await {
        Ok(()) => "Conversation started".to_string(),
        Err(e) => format!("Error: {}", e),
    }
}

/// Unix socket IPC server
pub struct IpcServer<B: AudioBackend, C: Connector> {
    listener: UnixListener,
    socket_path: PathBuf,
    conversation: Conversation<B, C>,
    shutdown: Arc<Notify>,
}

impl<B: AudioBackend, C: Connector> IpcServer<B, C> {
    /// Bind the control socket, replacing a stale one
    pub fn new(
        socket_path: &Path,
        conversation: Conversation<B, C>,
        shutdown: Arc<Notify>,
    ) -> Result<Self> {
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path).context("Failed to bind Unix socket")?;
        parley_paths::secure_socket_permissions(socket_path)?;

        info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            conversation,
            shutdown,
        })
    }

    /// Serve connections until the listener fails
    pub async fn run(&self) -> Result<()> {
        loop {
            let (stream, _) = self
                .listener
                .accept()
                .await
                .context("Failed to accept connection")?;

            let conversation = self.conversation.clone();
            let shutdown = Arc::clone(&self.shutdown);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, conversation, shutdown).await {
                    error!("IPC connection error: {}", e);
                }
            });
        }
    }
}

impl<B: AudioBackend, C: Connector> Drop for IpcServer<B, C> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Handle a single IPC connection
pub async fn handle_connection<B: AudioBackend, C: Connector>(
    mut stream: UnixStream,
    conversation: Conversation<B, C>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer).await?;

    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..n]);
    debug!("Received IPC command: {}", request.trim());

    let response = match IpcCommand::parse(&request) {
        Ok(command) => execute(command, &conversation, &shutdown).await,
        Err(e) => {
            warn!("{}", e);
            format!("Error: {}", e)
        }
    };

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    Ok(())
}

/// Client side of the control socket, used by `parley-daemon ctl`
pub async fn send_command(socket_path: &Path, command: &str, timeout: Duration) -> Result<String> {
    let exchange = async {
        let mut stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;

        stream.write_all(command.as_bytes()).await?;
        stream.shutdown().await?;

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await?;
        Ok::<_, anyhow::Error>(reply)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .context("Timed out waiting for the daemon")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(IpcCommand::parse("start\n").unwrap(), IpcCommand::Start);
        assert_eq!(IpcCommand::parse(" STOP ").unwrap(), IpcCommand::Stop);
        assert_eq!(IpcCommand::parse("toggle").unwrap(), IpcCommand::Toggle);
        assert_eq!(IpcCommand::parse("status").unwrap(), IpcCommand::Status);
        assert_eq!(IpcCommand::parse("transcript").unwrap(), IpcCommand::Transcript);
        assert_eq!(IpcCommand::parse("shutdown").unwrap(), IpcCommand::Quit);
    }

    #[test]
    fn test_unknown_command() {
        let err = IpcCommand::parse("dance").unwrap_err();
        assert!(err.to_string().contains("dance"));
    }
}
