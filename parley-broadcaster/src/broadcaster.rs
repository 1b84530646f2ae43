use chrono::Local;
use parley_session::{Speaker, TranscriptEntry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::{CatchUp, Client, ClientManager};
use crate::error::{FeedError, Result};
use crate::events::{BroadcastEvent, TranscriptLine};

#[derive(Default)]
struct Partials {
    user: String,
    model: String,
}

/// Conversation feed for UI clients
pub struct TranscriptBroadcaster {
    socket_path: PathBuf,
    client_manager: ClientManager,
    history: Arc<RwLock<Vec<TranscriptLine>>>,
    partials: Arc<RwLock<Partials>>,
    last_state: Arc<RwLock<String>>,
    current_session_id: Arc<RwLock<Option<u64>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
}

impl TranscriptBroadcaster {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            client_manager: ClientManager::new(),
            history: Arc::new(RwLock::new(Vec::new())),
            partials: Arc::new(RwLock::new(Partials::default())),
            last_state: Arc::new(RwLock::new("disconnected".to_string())),
            current_session_id: Arc::new(RwLock::new(None)),
            accept_task: Mutex::new(None),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening for clients
    pub async fn start(&self) -> Result<()> {
        if *self.running.read().await {
            return Err(FeedError::AlreadyListening);
        }

        let bind_error = |source| FeedError::Bind {
            path: self.socket_path.clone(),
            source,
        };
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(bind_error)?;
        parley_paths::secure_socket_permissions(&self.socket_path)
            .map_err(|e| FeedError::Permissions(e.to_string()))?;

        tracing::info!("Transcript broadcaster started on {:?}", self.socket_path);
        *self.running.write().await = true;

        let clients = self.client_manager.clone_arc();
        let history = Arc::clone(&self.history);
        let partials = Arc::clone(&self.partials);
        let state = Arc::clone(&self.last_state);
        let session_id = Arc::clone(&self.current_session_id);
        let running = Arc::clone(&self.running);

        let task = tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }

                let stream = match listener.accept().await {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        tracing::error!("Failed to accept client: {}", e);
                        continue;
                    }
                };
                let mut client = Client::new(stream);

                // Hold the client list while catching up so no live event
                // slips in between the snapshot and registration
                let mut clients = clients.lock().await;
                let state = state.read().await.clone();
                let session_id = *session_id.read().await;
                let history = history.read().await.clone();
                let partials = partials.read().await;

                let sent = client
                    .send_catch_up(CatchUp {
                        state: &state,
                        session_id,
                        history: &history,
                        pending_user: &partials.user,
                        pending_model: &partials.model,
                    })
                    .await;

                match sent {
                    Ok(()) => {
                        clients.push(client);
                        tracing::info!("Client added. Total: {}", clients.len());
                    }
                    Err(e) => tracing::warn!("Failed to send catch-up data: {}", e),
                }
            }
            tracing::info!("Client acceptance task stopped");
        });

        *self.accept_task.lock().await = Some(task);
        Ok(())
    }

    /// Stop accepting clients and remove the socket
    pub async fn stop(&self) -> Result<()> {
        if !*self.running.read().await {
            return Err(FeedError::NotListening);
        }
        *self.running.write().await = false;

        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove feed socket {:?}: {}", self.socket_path, e);
            }
        }

        tracing::info!("Transcript broadcaster stopped");
        Ok(())
    }

    /// New conversation: clears history and partials
    pub async fn start_session(&self, session_id: u64) {
        self.history.write().await.clear();
        *self.partials.write().await = Partials::default();
        *self.current_session_id.write().await = Some(session_id);

        self.client_manager
            .broadcast(&BroadcastEvent::SessionStart {
                session_id,
                timestamp: crate::current_timestamp(),
            })
            .await;
        tracing::info!("Session started: {}", session_id);
    }

    /// Conversation ended (history stays visible)
    pub async fn end_session(&self, session_id: u64) {
        *self.current_session_id.write().await = None;

        self.client_manager
            .broadcast(&BroadcastEvent::SessionEnd {
                session_id,
                timestamp: crate::current_timestamp(),
            })
            .await;
        tracing::info!("Session ended: {}", session_id);
    }

    pub async fn update_partial(&self, speaker: Speaker, text: &str) {
        {
            let mut partials = self.partials.write().await;
            match speaker {
                Speaker::User => partials.user = text.to_string(),
                Speaker::Model => partials.model = text.to_string(),
            }
        }

        self.client_manager
            .broadcast(&BroadcastEvent::PartialTranscript {
                speaker,
                text: text.to_string(),
            })
            .await;
    }

    /// Append a committed entry; the speaker's partial is cleared
    pub async fn add_entry(&self, entry: &TranscriptEntry) {
        let line = TranscriptLine {
            speaker: entry.speaker,
            text: entry.text.clone(),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        };

        {
            let mut partials = self.partials.write().await;
            match entry.speaker {
                Speaker::User => partials.user.clear(),
                Speaker::Model => partials.model.clear(),
            }
        }
        self.history.write().await.push(line.clone());

        self.client_manager
            .broadcast(&BroadcastEvent::TranscriptEntry {
                speaker: line.speaker,
                text: line.text,
                timestamp: line.timestamp,
            })
            .await;
    }

    pub async fn broadcast_state_change(&self, state: &str) {
        *self.last_state.write().await = state.to_string();

        self.client_manager
            .broadcast(&BroadcastEvent::StateChange {
                state: state.to_string(),
                timestamp: crate::current_timestamp(),
            })
            .await;
    }

    pub async fn client_count(&self) -> usize {
        self.client_manager.client_count().await
    }

    /// Committed entries held for catch-up
    pub async fn buffer_size(&self) -> usize {
        self.history.read().await.len()
    }
}

impl Drop for TranscriptBroadcaster {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
