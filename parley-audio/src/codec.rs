//! PCM16 wire codec
//!
//! Outbound blocks are `f32` samples scaled to signed 16-bit integers, packed
//! little-endian and base64 encoded. Inbound chunks go the other way and are
//! de-interleaved per channel.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{AudioError, Result};

/// Scale between normalized floats and 16-bit PCM.
const PCM16_SCALE: f32 = 32768.0;

/// Transport-safe audio block ready to be sent on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioPayload {
    /// Base64 of little-endian PCM16 samples
    pub data: String,
    /// MIME-style media type, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedAudioPayload {
    /// Encode a mono block captured at `sample_rate`.
    pub fn pcm16(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: encode(samples),
            mime_type: pcm_mime_type(sample_rate),
        }
    }
}

/// Decoded inbound audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// `audio/pcm;rate=<rate>`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter from a PCM media type.
pub fn pcm_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Encode normalized samples as base64 PCM16 little-endian.
///
/// Values are truncated toward zero; anything outside [-1, 1] saturates at the
/// 16-bit rails.
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode base64 PCM16 into per-channel normalized samples.
pub fn decode(data: &str, sample_rate: u32, channel_count: u16) -> Result<DecodedAudio> {
    if channel_count == 0 {
        return Err(AudioError::malformed("channel count cannot be zero"));
    }

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| AudioError::malformed(format!("invalid base64: {}", e)))?;

    let frame_bytes = 2 * channel_count as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(AudioError::malformed(format!(
            "{} bytes is not a multiple of {} ({} channel(s) of 16-bit samples)",
            bytes.len(),
            frame_bytes,
            channel_count
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count as usize];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, pair) in channels.iter_mut().zip(frame.chunks_exact(2)) {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            channel.push(value as f32 / PCM16_SCALE);
        }
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
    })
}
