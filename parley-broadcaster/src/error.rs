use std::path::PathBuf;
use thiserror::Error;

/// Failures of the UI feed socket
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Cannot listen on {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot restrict feed socket permissions: {0}")]
    Permissions(String),

    #[error("Client write failed: {0}")]
    ClientWrite(#[from] std::io::Error),

    #[error("Event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Feed is already listening")]
    AlreadyListening,

    #[error("Feed is not listening")]
    NotListening,
}

pub type Result<T> = std::result::Result<T, FeedError>;
