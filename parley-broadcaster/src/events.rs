use parley_session::Speaker;
use serde::{Deserialize, Serialize};

/// Event types broadcast to UI clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum BroadcastEvent {
    /// Conversation started - clears the transcript buffer
    #[serde(rename = "session_start")]
    SessionStart { session_id: u64, timestamp: f64 },

    /// Conversation ended - buffer stays visible
    #[serde(rename = "session_end")]
    SessionEnd { session_id: u64, timestamp: f64 },

    /// Conversation status changed (`listening`, `error: ...`)
    #[serde(rename = "state_change")]
    StateChange { state: String, timestamp: f64 },

    /// In-progress text for one speaker; replaces the previous partial
    #[serde(rename = "partial_transcript")]
    PartialTranscript { speaker: Speaker, text: String },

    /// Committed history entry
    #[serde(rename = "transcript_entry")]
    TranscriptEntry {
        speaker: Speaker,
        text: String,
        timestamp: String, // HH:MM:SS format
    },
}

/// Committed entry stored in the RAM buffer
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: String,
}

impl BroadcastEvent {
    /// Convert event to JSON string with newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}
