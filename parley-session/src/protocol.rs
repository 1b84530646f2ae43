//! Live API wire messages
//!
//! Only this module knows the JSON field names. Outbound frames are built from
//! typed structs; inbound frames are decoded leniently (unknown fields are
//! ignored, every field is optional) and turned into [`InboundEvent`]s.

use parley_audio::codec::pcm_rate_from_mime;
use parley_audio::{EncodedAudioPayload, RESPONSE_SAMPLE_RATE};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::events::InboundEvent;

#[derive(Serialize)]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Enabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Enabled>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

/// Serializes as `{}`
#[derive(Serialize)]
struct Enabled {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [MediaChunk<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk<'a> {
    mime_type: &'a str,
    data: &'a str,
}

/// First frame of every session
pub fn setup_frame(config: &SessionConfig) -> Result<String> {
    let message = SetupMessage {
        setup: Setup {
            model: &config.model,
            generation_config: GenerationConfig {
                response_modalities: ["AUDIO"],
            },
            system_instruction: config.system_instruction.as_deref().map(|text| Content {
                parts: [TextPart { text }],
            }),
            input_audio_transcription: config.input_transcription.then_some(Enabled {}),
            output_audio_transcription: config.output_transcription.then_some(Enabled {}),
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// One captured block as a realtime input frame
pub fn realtime_input_frame(payload: &EncodedAudioPayload) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: [MediaChunk {
                mime_type: &payload.mime_type,
                data: &payload.data,
            }],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
    error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Everything one inbound frame carries
#[derive(Debug, Default, PartialEq)]
pub struct ServerFrame {
    pub setup_complete: bool,
    pub events: Vec<InboundEvent>,
    /// The endpoint will disconnect soon; carries the time left if given
    pub go_away: Option<String>,
    pub error: Option<String>,
}

/// Decode one text frame.
///
/// Events come out in a fixed order: user transcript, model transcript, audio
/// parts as they appear, interruption, turn completion.
pub fn decode_server_message(raw: &str) -> Result<ServerFrame> {
    let message: ServerMessage = serde_json::from_str(raw)?;
    let mut frame = ServerFrame {
        setup_complete: message.setup_complete.is_some(),
        ..Default::default()
    };

    if let Some(go_away) = message.go_away {
        frame.go_away = Some(go_away.time_left.unwrap_or_default());
    }

    if let Some(error) = message.error {
        frame.error = Some(match error.code {
            Some(code) => format!("{} (code {})", error.message, code),
            None => error.message,
        });
    }

    let Some(content) = message.server_content else {
        return Ok(frame);
    };

    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            frame.events.push(InboundEvent::PartialUserTranscript(text));
        }
    }
    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            frame.events.push(InboundEvent::PartialModelTranscript(text));
        }
    }

    if let Some(turn) = content.model_turn {
        for inline in turn.parts.into_iter().filter_map(|p| p.inline_data) {
            let mime = inline.mime_type.as_deref().unwrap_or("audio/pcm");
            if !mime.starts_with("audio/") {
                continue;
            }
            frame.events.push(InboundEvent::AudioChunk {
                data: inline.data,
                sample_rate: pcm_rate_from_mime(mime).unwrap_or(RESPONSE_SAMPLE_RATE),
            });
        }
    }

    if content.interrupted {
        frame.events.push(InboundEvent::Interrupted);
    }
    if content.turn_complete {
        frame.events.push(InboundEvent::TurnComplete);
    }

    Ok(frame)
}
