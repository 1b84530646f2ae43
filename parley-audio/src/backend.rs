//! Device factory seam
//!
//! The conversation owns its devices only for the lifetime of one session, so
//! it needs a way to open fresh ones on every start. Production code uses
//! [`CpalBackend`]; tests substitute in-memory devices.

use crate::capture::{AudioCapture, CaptureDevice};
use crate::error::Result;
use crate::output::{CpalOutput, OutputConfig};
use crate::playback::{EndedCallback, OutputDevice};
use crate::AudioConfig;

pub trait AudioBackend: Send + Sync + 'static {
    type Capture: CaptureDevice + 'static;
    type Output: OutputDevice + 'static;

    /// Acquire the microphone. Does not start capturing.
    fn open_capture(&self, config: &AudioConfig) -> Result<Self::Capture>;

    /// Acquire the speaker. `on_ended` is called with each finished source.
    fn open_output(&self, config: &OutputConfig, on_ended: EndedCallback) -> Result<Self::Output>;
}

/// Host audio through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    type Capture = AudioCapture;
    type Output = CpalOutput;

    fn open_capture(&self, config: &AudioConfig) -> Result<AudioCapture> {
        AudioCapture::new(config.clone())
    }

    fn open_output(&self, config: &OutputConfig, on_ended: EndedCallback) -> Result<CpalOutput> {
        CpalOutput::open(config, on_ended)
    }
}
