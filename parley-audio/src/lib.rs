//! Parley Audio
//!
//! Both ends of a spoken conversation: microphone capture delivering fixed
//! 16kHz PCM blocks, and gapless playback of the 24kHz response stream.
//!
//! ## Architecture
//!
//! ```text
//! Microphone (cpal)
//!   │
//!   ├─> Resampler (rubato) -> 16kHz mono
//!   │
//!   └─> CircularBuffer (ringbuf) -> 4096-sample blocks -> encode() -> base64 PCM16
//!
//! base64 PCM16 -> decode() -> PlaybackScheduler -> CpalOutput (mixer) -> Speaker
//! ```

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod codec;
pub mod error;
pub mod output;
pub mod playback;
pub mod resampler;

mod stream_thread;

pub use backend::{AudioBackend, CpalBackend};
pub use buffer::CircularBuffer;
pub use capture::{AudioCapture, BlockCallback, CaptureDevice, DeviceInfo};
pub use codec::{decode, encode, DecodedAudio, EncodedAudioPayload};
pub use error::{AudioError, Result};
pub use output::{CpalOutput, OutputConfig};
pub use playback::{EndedCallback, OutputDevice, PlaybackScheduler, PlaybackSource, SourceId};
pub use resampler::Resampler;

/// Capture rate expected by the remote model
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Rate of response audio when the MIME type does not say otherwise
pub const RESPONSE_SAMPLE_RATE: u32 = 24000;

/// Samples per captured block (256ms at 16kHz)
pub const DEFAULT_BLOCKSIZE: usize = 4096;

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Target sample rate (default: 16000 Hz)
    pub sample_rate: u32,
    /// Number of channels (default: 1 = mono)
    pub channels: u16,
    /// Samples per block (default: 4096)
    pub blocksize: usize,
    /// Ring capacity in seconds (default: 2.0)
    pub buffer_duration: f32,
    /// Device index (None = default device)
    pub device_index: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 1,
            blocksize: DEFAULT_BLOCKSIZE,
            buffer_duration: 2.0,
            device_index: None,
        }
    }
}
