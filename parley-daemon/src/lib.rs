//! Parley daemon library
//!
//! The conversation orchestrator and the daemon's control surfaces, exposed
//! for the binary and for integration tests.

pub mod config;
pub mod conversation;
pub mod feed;
pub mod ipc;
pub mod version;

pub use config::DaemonConfig;
pub use conversation::{
    Conversation, ConversationError, ConversationSettings, ConversationStatus, ConversationUpdate,
};
