//! Audio resampling with rubato
//!
//! Converts capture audio from the device rate to 16kHz mono, and response
//! audio from 24kHz to whatever rate the output device runs at.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::{AudioError, Result};

const SINC_LEN: usize = 256;
const HALF_SINC: usize = SINC_LEN / 2;

/// Resampler for converting audio to target sample rate
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    channels: u16,
    resampler: Option<SincFixedIn<f32>>,
}

impl Resampler {
    /// Create new resampler
    ///
    /// # Arguments
    ///
    /// * `source_rate` - Source sample rate (e.g., 48000)
    /// * `target_rate` - Target sample rate (16000 for capture)
    /// * `channels` - Number of channels (1 = mono, 2 = stereo)
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(AudioError::invalid_config("Sample rate cannot be zero"));
        }

        if channels == 0 {
            return Err(AudioError::invalid_config("Channel count cannot be zero"));
        }

        let resampler = if source_rate != target_rate {
            Some(Self::create_resampler(source_rate, target_rate, channels)?)
        } else {
            None
        };

        Ok(Self {
            source_rate,
            target_rate,
            channels,
            resampler,
        })
    }

    fn create_resampler(
        source_rate: u32,
        target_rate: u32,
        channels: u16,
    ) -> Result<SincFixedIn<f32>> {
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        // Process 100ms at a time
        let chunk_size = Self::chunk_frames_for(source_rate);

        SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            2.0,
            params,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| AudioError::ResampleError(format!("Failed to create resampler: {:?}", e)))
    }

    fn chunk_frames_for(source_rate: u32) -> usize {
        (source_rate as f32 * 0.1) as usize
    }

    /// Frames the resampler consumes per `process` call (100ms at source rate).
    pub fn chunk_frames(&self) -> usize {
        Self::chunk_frames_for(self.source_rate)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Resample exactly one chunk of interleaved audio.
    ///
    /// The capture callback accumulates device audio and calls this once per
    /// `chunk_frames()` frames.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let channels = self.channels as usize;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        if input.is_empty() {
            return Ok(Vec::new());
        }

        let planar_input = deinterleave(input, channels);
        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| AudioError::ResampleError(format!("Resampling failed: {:?}", e)))?;

        Ok(interleave(&planar_output, channels))
    }

    /// Output frames of filter lead-in that [`segment`](Self::segment) emits
    /// ahead of the input's first frame. The same number of tail frames
    /// follows the input's last frame.
    pub fn segment_lead(&self) -> usize {
        if self.resampler.is_none() {
            return 0;
        }
        (HALF_SINC as f64 * self.target_rate as f64 / self.source_rate as f64).round() as usize
    }

    /// Resample one standalone piece of a longer signal, keeping the full
    /// filter response on both sides.
    ///
    /// The result is `segment_lead()` frames of lead-in, the body
    /// (`expected_output_len(input.len())` samples) and `segment_lead()`
    /// frames of tail. Resampling is linear, so summing the segments of
    /// consecutive pieces, each shifted to its position in the stream,
    /// reproduces the resampled stream without a seam.
    pub fn segment(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let channels = self.channels as usize;
        let lead = self.segment_lead();
        let out_frames = self.expected_output_len(input.len()) / channels + 2 * lead;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        resampler.reset();
        let chunk = resampler.input_frames_next();
        let frames = input.len() / channels;
        let padded_frames = (2 * HALF_SINC + frames + 2 * SINC_LEN).div_ceil(chunk) * chunk;

        let mut planar_input = vec![vec![0.0f32; padded_frames]; channels];
        for (frame_idx, frame) in input.chunks_exact(channels).enumerate() {
            for (ch_idx, &sample) in frame.iter().enumerate() {
                planar_input[ch_idx][HALF_SINC + frame_idx] = sample;
            }
        }

        let mut planar_output: Vec<Vec<f32>> = vec![Vec::with_capacity(out_frames); channels];
        for offset in (0..padded_frames).step_by(chunk) {
            let slices: Vec<&[f32]> = planar_input
                .iter()
                .map(|c| &c[offset..offset + chunk])
                .collect();
            let part = resampler
                .process(slices.as_slice(), None)
                .map_err(|e| AudioError::ResampleError(format!("Resampling failed: {:?}", e)))?;
            for (out, part) in planar_output.iter_mut().zip(part) {
                out.extend(part);
            }
            if planar_output[0].len() >= out_frames {
                break;
            }
        }

        for out in planar_output.iter_mut() {
            out.resize(out_frames, 0.0);
        }
        Ok(interleave(&planar_output, channels))
    }

    /// Get expected output length for given input length
    pub fn expected_output_len(&self, input_len: usize) -> usize {
        if self.resampler.is_none() {
            return input_len;
        }

        let frames = input_len / self.channels as usize;
        let output_frames =
            (frames as f64 * self.target_rate as f64 / self.source_rate as f64).round() as usize;
        output_frames * self.channels as usize
    }
}

fn deinterleave(input: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = input.len() / channels;
    let mut planar = vec![vec![0.0f32; frames]; channels];
    for (frame_idx, frame) in input.chunks_exact(channels).enumerate() {
        for (ch_idx, &sample) in frame.iter().enumerate() {
            planar[ch_idx][frame_idx] = sample;
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>], channels: usize) -> Vec<f32> {
    let frames = planar.first().map(|c| c.len()).unwrap_or(0);
    let mut interleaved = Vec::with_capacity(frames * channels);
    for frame_idx in 0..frames {
        for channel_data in planar.iter().take(channels) {
            interleaved.push(channel_data[frame_idx]);
        }
    }
    interleaved
}
