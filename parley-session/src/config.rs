use std::time::Duration;

/// Live API endpoint for bidirectional generate-content sessions
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful and friendly assistant named Kriative AI.";

/// Parameters for one remote session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_instruction: Option<String>,
    /// Ask the endpoint to transcribe the user's speech
    pub input_transcription: bool,
    /// Ask the endpoint to transcribe its own speech
    pub output_transcription: bool,
    /// Outbound frames queued between the capture thread and the socket
    pub outbound_queue: usize,
    /// Frames held while the session is still connecting
    pub preopen_buffer: usize,
    /// Upper bound on the WebSocket handshake. None waits until the
    /// conversation is stopped.
    pub connect_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            input_transcription: true,
            output_transcription: true,
            outbound_queue: 64,
            preopen_buffer: 16,
            connect_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Endpoint URL including the API key query parameter, if one is set
    pub fn url(&self) -> String {
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let separator = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.endpoint, separator, key)
            }
            None => self.endpoint.clone(),
        }
    }
}
