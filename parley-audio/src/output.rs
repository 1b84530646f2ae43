//! cpal output device with a frame-accurate mixer
//!
//! The device clock is the number of frames the output callback has rendered
//! divided by the stream rate. Sources are placed at an absolute frame, so two
//! sources scheduled back-to-back by the [`PlaybackScheduler`](crate::PlaybackScheduler)
//! meet exactly at a frame boundary.
//!
//! When the device does not run at the response rate, each source is resampled
//! as a [`Resampler::segment`]: its filter lead-in and tail overlap the
//! neighbouring sources and the mixer sums them back into one continuous signal.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::DecodedAudio;
use crate::error::{AudioError, Result};
use crate::playback::{EndedCallback, OutputDevice, SourceId};
use crate::resampler::Resampler;
use crate::stream_thread::StreamThread;

/// Output device configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Preferred stream rate; the response audio rate avoids resampling
    pub sample_rate: u32,
    /// Device index (None = default device)
    pub device_index: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::RESPONSE_SAMPLE_RATE,
            device_index: None,
        }
    }
}

struct Voice {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    /// Position a resampled segment so its body starts at `start_frame`.
    /// Lead-in that would fall before frame 0 is dropped.
    fn placed(id: SourceId, start_frame: u64, lead: usize, mut samples: Vec<f32>) -> Self {
        let lead = lead as u64;
        let skip = lead.saturating_sub(start_frame);
        samples.drain(..(skip as usize).min(samples.len()));
        Self {
            id,
            start_frame: start_frame + skip - lead,
            samples,
        }
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
    rendered: u64,
}

impl Mixer {
    /// Fill one interleaved buffer and return the ids of voices that finished.
    fn render(&mut self, data: &mut [f32], channels: usize) -> Vec<SourceId> {
        let base = self.rendered;
        let mut frames = 0u64;

        for (offset, frame) in data.chunks_mut(channels).enumerate() {
            let position = base + offset as u64;
            let mut sample = 0.0;
            for voice in &self.voices {
                if position >= voice.start_frame {
                    if let Some(s) = voice.samples.get((position - voice.start_frame) as usize) {
                        sample += *s;
                    }
                }
            }
            frame.fill(sample);
            frames += 1;
        }

        self.rendered = base + frames;
        let rendered = self.rendered;
        let mut ended = Vec::new();
        self.voices.retain(|voice| {
            let done = voice.end_frame() <= rendered;
            if done {
                ended.push(voice.id);
            }
            !done
        });
        ended
    }
}

struct OpenedOutput {
    device_name: String,
    sample_rate: u32,
    channels: u16,
}

/// Speaker output backed by a cpal stream
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    rendered: Arc<AtomicU64>,
    sample_rate: u32,
    resampler: Option<(u32, Resampler)>,
    stream: Option<StreamThread>,
}

impl CpalOutput {
    /// Open the output device and start rendering silence.
    ///
    /// `on_ended` runs on the audio thread; it must only hand the id off.
    pub fn open(config: &OutputConfig, on_ended: EndedCallback) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let rendered = Arc::new(AtomicU64::new(0));
        let preferred_rate = config.sample_rate;
        let device_index = config.device_index;

        let callback_mixer = Arc::clone(&mixer);
        let callback_rendered = Arc::clone(&rendered);

        let (stream, opened) = StreamThread::spawn("parley-playback", move || {
            let host = cpal::default_host();
            let device = match device_index {
                Some(index) => host.output_devices()?.nth(index).ok_or_else(|| {
                    AudioError::device(format!("Output device index {} not found", index))
                })?,
                None => host
                    .default_output_device()
                    .ok_or_else(|| AudioError::device("No default output device found"))?,
            };
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let preferred = cpal::SampleRate(preferred_rate);
            let supported = device
                .supported_output_configs()
                .ok()
                .and_then(|mut ranges| {
                    ranges.find(|r| {
                        r.sample_format() == SampleFormat::F32
                            && r.min_sample_rate() <= preferred
                            && r.max_sample_rate() >= preferred
                    })
                })
                .map(|r| r.with_sample_rate(preferred));

            let supported = match supported {
                Some(config) => config,
                None => device.default_output_config()?,
            };

            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels();
            let stream_config = StreamConfig {
                channels,
                sample_rate: supported.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let ended = {
                        let mut mixer = callback_mixer.lock();
                        let ended = mixer.render(data, channels as usize);
                        callback_rendered.store(mixer.rendered, Ordering::Release);
                        ended
                    };
                    for id in ended {
                        on_ended(id);
                    }
                },
                |err| {
                    warn!("Playback stream error: {}", err);
                },
                None,
            )?;

            Ok((
                stream,
                OpenedOutput {
                    device_name,
                    sample_rate,
                    channels,
                },
            ))
        })?;

        info!(
            "Playback opened on '{}': {} Hz x{}",
            opened.device_name, opened.sample_rate, opened.channels
        );
        if opened.sample_rate != preferred_rate {
            info!(
                "Response audio will be resampled {} Hz -> {} Hz",
                preferred_rate, opened.sample_rate
            );
        }

        Ok(Self {
            mixer,
            rendered,
            sample_rate: opened.sample_rate,
            resampler: None,
            stream: Some(stream),
        })
    }

    /// Mono samples at the device rate plus the segment lead-in length
    fn to_device_rate(&mut self, audio: &DecodedAudio) -> Result<(Vec<f32>, usize)> {
        let mono = audio.to_mono();
        if audio.sample_rate == self.sample_rate {
            return Ok((mono, 0));
        }

        let reuse = matches!(&self.resampler, Some((rate, _)) if *rate == audio.sample_rate);
        if !reuse {
            let resampler = Resampler::new(audio.sample_rate, self.sample_rate, 1)?;
            self.resampler = Some((audio.sample_rate, resampler));
        }

        match self.resampler.as_mut() {
            Some((_, resampler)) => Ok((resampler.segment(&mono)?, resampler.segment_lead())),
            None => Err(AudioError::Internal("resampler missing".to_string())),
        }
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_source(&mut self, id: SourceId, start_time: f64, audio: &DecodedAudio) -> Result<()> {
        if self.stream.is_none() {
            return Err(AudioError::stream("Output device is closed"));
        }

        let (mut samples, lead) = self.to_device_rate(audio)?;
        // Exact body length keeps neighbours aligned after rounding
        let frames = (audio.duration() * self.sample_rate as f64).round() as usize;
        samples.resize(frames + 2 * lead, 0.0);

        let start_frame = (start_time * self.sample_rate as f64).round() as u64;
        self.mixer
            .lock()
            .voices
            .push(Voice::placed(id, start_frame, lead, samples));
        Ok(())
    }

    fn stop_all(&mut self) {
        self.mixer.lock().voices.clear();
    }

    fn close(&mut self) {
        self.stop_all();
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            info!("Playback closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
