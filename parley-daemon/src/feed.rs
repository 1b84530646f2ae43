//! Forwards conversation updates to the UI event socket

use parley_broadcaster::TranscriptBroadcaster;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::conversation::ConversationUpdate;

/// Apply one update to the broadcaster
pub async fn forward(broadcaster: &TranscriptBroadcaster, update: ConversationUpdate) {
    match update {
        ConversationUpdate::StatusChanged(status) => {
            broadcaster.broadcast_state_change(&status.to_string()).await;
        }
        ConversationUpdate::SessionStarted(id) => broadcaster.start_session(id).await,
        ConversationUpdate::SessionEnded(id) => broadcaster.end_session(id).await,
        ConversationUpdate::Partial { speaker, text } => {
            broadcaster.update_partial(speaker, &text).await;
        }
        ConversationUpdate::Committed(entry) => broadcaster.add_entry(&entry).await,
    }
}

/// Spawn the bridge task. It ends when the conversation is dropped.
pub fn spawn(
    broadcaster: Arc<TranscriptBroadcaster>,
    mut updates: broadcast::Receiver<ConversationUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => forward(&broadcaster, update).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!("UI feed fell behind, {} update(s) skipped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("UI feed stopped");
    })
}
