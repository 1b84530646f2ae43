//! Live conversation feed for Parley UIs
//!
//! A Unix socket server that pushes conversation status, partial transcripts
//! and committed transcript entries to every connected client as
//! newline-delimited JSON. Clients that connect mid-conversation first
//! receive a catch-up: current state, active session, history, partials.
//!
//! # Event Types
//!
//! - `session_start` - Conversation begins, clears history
//! - `session_end` - Conversation ends, history stays visible
//! - `state_change` - Status changed (`connecting`, `listening`, `error: ...`)
//! - `partial_transcript` - Latest in-progress text for one speaker
//! - `transcript_entry` - Committed user or model line
//!
//! # Example Usage
//!
//! ```no_run
//! use parley_broadcaster::TranscriptBroadcaster;
//! use parley_session::{Speaker, TranscriptEntry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broadcaster = TranscriptBroadcaster::new("/tmp/parley_events.sock");
//!     broadcaster.start().await?;
//!
//!     broadcaster.start_session(1).await;
//!     broadcaster.broadcast_state_change("listening").await;
//!     broadcaster.update_partial(Speaker::User, "What's the").await;
//!     broadcaster
//!         .add_entry(&TranscriptEntry {
//!             speaker: Speaker::User,
//!             text: "What's the weather?".to_string(),
//!         })
//!         .await;
//!     broadcaster.end_session(1).await;
//!
//!     broadcaster.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod error;
pub mod events;

// Re-exports
pub use broadcaster::TranscriptBroadcaster;
pub use error::{FeedError, Result};
pub use events::{BroadcastEvent, TranscriptLine};

/// Seconds since the Unix epoch
pub(crate) fn current_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
