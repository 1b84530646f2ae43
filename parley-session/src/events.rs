use serde::Serialize;
use std::fmt;

/// Typed notification decoded from the endpoint, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Fragment of the transcription of the user's speech
    PartialUserTranscript(String),
    /// Fragment of the transcription of the model's speech
    PartialModelTranscript(String),
    /// The model finished its turn
    TurnComplete,
    /// Base64 PCM16 response audio
    AudioChunk { data: String, sample_rate: u32 },
    /// The user spoke over the model; pending playback should stop
    Interrupted,
    SessionError(String),
    SessionClosed,
}

impl InboundEvent {
    /// Events after which the session delivers nothing further
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundEvent::SessionError(_) | InboundEvent::SessionClosed)
    }
}

/// Session lifecycle. `Closed` and `Errored` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        };
        write!(f, "{}", s)
    }
}
