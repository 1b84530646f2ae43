//! Error types for audio capture, codec and playback

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Malformed audio payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resampling error: {0}")]
    ResampleError(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AudioError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::StreamError(msg.into())
    }

    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedPayload(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True for failures that mean the microphone or speaker could not be
    /// acquired at all, as opposed to a failure mid-stream.
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::DeviceUnavailable(_))
    }
}

/// Map a backend-specific message onto the acquisition taxonomy.
///
/// cpal surfaces OS permission refusals as `BackendSpecific` errors whose only
/// distinguishing feature is the description text.
pub(crate) fn classify_backend_message(description: &str) -> AudioError {
    let lower = description.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("not permitted")
    {
        AudioError::PermissionDenied(description.to_string())
    } else {
        AudioError::StreamError(description.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::device("The requested device is no longer available")
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                AudioError::invalid_config("Stream configuration not supported by device")
            }
            cpal::BuildStreamError::BackendSpecific { err } => {
                classify_backend_message(&err.description)
            }
            other => AudioError::stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                AudioError::device("The requested device is no longer available")
            }
            cpal::PlayStreamError::BackendSpecific { err } => {
                classify_backend_message(&err.description)
            }
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                classify_backend_message(&err.description)
            }
            other => AudioError::device(other.to_string()),
        }
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::device(format!("Failed to enumerate devices: {}", err))
    }
}
