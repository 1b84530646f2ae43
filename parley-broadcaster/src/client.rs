use parley_session::Speaker;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::{BroadcastEvent, TranscriptLine};

/// State a late-joining client needs to render the current conversation
pub struct CatchUp<'a> {
    pub state: &'a str,
    pub session_id: Option<u64>,
    pub history: &'a [TranscriptLine],
    pub pending_user: &'a str,
    pub pending_model: &'a str,
}

/// Client connection wrapper
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Send event to client
    pub async fn send_event(&mut self, event: &BroadcastEvent) -> Result<()> {
        let json_line = event.to_json_line()?;
        self.stream.write_all(json_line.as_bytes()).await?;
        Ok(())
    }

    /// Replay state, session, history and partials in that order
    pub async fn send_catch_up(&mut self, catch_up: CatchUp<'_>) -> Result<()> {
        self.send_event(&BroadcastEvent::StateChange {
            state: catch_up.state.to_string(),
            timestamp: crate::current_timestamp(),
        })
        .await?;

        if let Some(session_id) = catch_up.session_id {
            self.send_event(&BroadcastEvent::SessionStart {
                session_id,
                timestamp: crate::current_timestamp(),
            })
            .await?;
        }

        for line in catch_up.history {
            self.send_event(&BroadcastEvent::TranscriptEntry {
                speaker: line.speaker,
                text: line.text.clone(),
                timestamp: line.timestamp.clone(),
            })
            .await?;
        }

        for (speaker, text) in [
            (Speaker::User, catch_up.pending_user),
            (Speaker::Model, catch_up.pending_model),
        ] {
            if !text.is_empty() {
                self.send_event(&BroadcastEvent::PartialTranscript {
                    speaker,
                    text: text.to_string(),
                })
                .await?;
            }
        }

        Ok(())
    }
}

/// Thread-safe client list manager
pub struct ClientManager {
    clients: Arc<Mutex<Vec<Client>>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Broadcast event to all clients, removing dead ones
    pub async fn broadcast(&self, event: &BroadcastEvent) {
        let mut clients = self.clients.lock().await;
        let before = clients.len();

        let mut alive = Vec::with_capacity(before);
        for (idx, mut client) in clients.drain(..).enumerate() {
            match client.send_event(event).await {
                Ok(()) => alive.push(client),
                Err(e) => tracing::warn!("Dropping client {}: {}", idx, e),
            }
        }
        *clients = alive;

        if clients.len() < before {
            tracing::info!("Removed dead client(s). Remaining: {}", clients.len());
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Get cloned Arc for sharing
    pub fn clone_arc(&self) -> Arc<Mutex<Vec<Client>>> {
        Arc::clone(&self.clients)
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}
