//! Realtime voice session client for Parley
//!
//! One [`SessionHandle`] per conversation: it carries captured audio to a
//! Live-API-style endpoint and turns what comes back into typed
//! [`InboundEvent`]s. The [`TranscriptAggregator`] folds the transcription
//! events into a turn history.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley_session::{open, InboundEvent, SessionConfig, SessionState, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig {
//!         api_key: std::env::var("GEMINI_API_KEY").ok(),
//!         ..Default::default()
//!     };
//!     let (session, mut events) = open(Arc::new(WebSocketConnector), config);
//!
//!     if session.wait_open().await != SessionState::Open {
//!         return;
//!     }
//!
//!     while let Some(event) = events.recv().await {
//!         if let InboundEvent::TurnComplete = event {
//!             session.close();
//!         }
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transcript;
pub mod transport;

pub use client::{open, SessionHandle, SessionSender};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use events::{InboundEvent, SessionState};
pub use transcript::{
    Speaker, TranscriptAggregator, TranscriptEntry, TranscriptSnapshot, TranscriptUpdate,
};
pub use transport::{Connector, Transport, WebSocketConnector};
