//! Microphone capture with cpal
//!
//! Delivers fixed-size 16kHz mono blocks to a callback. The cpal stream lives
//! on its own thread (see `stream_thread`); the callback runs on the audio
//! thread and must not block.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::StreamConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::buffer::CircularBuffer;
use crate::error::{AudioError, Result};
use crate::resampler::Resampler;
use crate::stream_thread::StreamThread;
use crate::AudioConfig;

/// Callback receiving one AudioBlock per capture period
pub type BlockCallback = Arc<dyn Fn(Vec<f32>) + Send + Sync>;

/// A source of fixed-size audio blocks.
///
/// `stop` must be idempotent and safe to call on a device that never started.
pub trait CaptureDevice: Send {
    fn start(&mut self, on_block: BlockCallback) -> Result<()>;
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// Audio device information
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
}

/// What the capture thread actually opened
struct OpenedInput {
    device_name: String,
    source_rate: u32,
    source_channels: u16,
}

/// Microphone capture implementation
pub struct AudioCapture {
    config: AudioConfig,
    stream: Option<StreamThread>,
    is_recording: Arc<AtomicBool>,
    total_frames: Arc<AtomicUsize>,
    blocks_emitted: Arc<AtomicUsize>,
}

impl AudioCapture {
    /// Create new audio capture instance. No device is touched until `start`.
    pub fn new(config: AudioConfig) -> Result<Self> {
        if config.blocksize == 0 {
            return Err(AudioError::invalid_config("Block size cannot be zero"));
        }
        if config.sample_rate == 0 {
            return Err(AudioError::invalid_config("Sample rate cannot be zero"));
        }

        Ok(Self {
            config,
            stream: None,
            is_recording: Arc::new(AtomicBool::new(false)),
            total_frames: Arc::new(AtomicUsize::new(0)),
            blocks_emitted: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// List all available input devices
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let mut devices = Vec::new();

        for (index, device) in host.input_devices()?.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Unknown Device {}", index));

            let (max_input_channels, default_sample_rate) = device
                .default_input_config()
                .map(|c| (c.channels(), c.sample_rate().0))
                .unwrap_or((0, 0));

            devices.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                default_sample_rate,
            });
        }

        Ok(devices)
    }

    /// Total 16kHz frames captured since the last `start`
    pub fn total_frames(&self) -> usize {
        self.total_frames.load(Ordering::Relaxed)
    }

    /// Blocks delivered to the callback since the last `start`
    pub fn blocks_emitted(&self) -> usize {
        self.blocks_emitted.load(Ordering::Relaxed)
    }

    fn select_device(host: &cpal::Host, device_index: Option<usize>) -> Result<cpal::Device> {
        match device_index {
            Some(index) => host
                .input_devices()?
                .nth(index)
                .ok_or_else(|| AudioError::device(format!("Input device index {} not found", index))),
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::device("No default input device found")),
        }
    }
}

impl CaptureDevice for AudioCapture {
    fn start(&mut self, on_block: BlockCallback) -> Result<()> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyRecording);
        }

        self.total_frames.store(0, Ordering::Relaxed);
        self.blocks_emitted.store(0, Ordering::Relaxed);
        self.is_recording.store(true, Ordering::Relaxed);

        let device_index = self.config.device_index;
        let target_rate = self.config.sample_rate;
        let blocksize = self.config.blocksize;
        let ring_capacity = ((self.config.buffer_duration * target_rate as f32) as usize)
            .max(blocksize * 2);

        let is_recording = Arc::clone(&self.is_recording);
        let total_frames = Arc::clone(&self.total_frames);
        let blocks_emitted = Arc::clone(&self.blocks_emitted);

        let spawned = StreamThread::spawn("parley-capture", move || {
            let host = cpal::default_host();
            let device = Self::select_device(&host, device_index)?;
            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

            let supported_config = device.default_input_config()?;
            let source_rate = supported_config.sample_rate().0;
            let source_channels = supported_config.channels();

            let mut resampler = if source_rate != target_rate {
                Some(Resampler::new(source_rate, target_rate, 1)?)
            } else {
                None
            };
            let resample_chunk = resampler.as_ref().map(|r| r.chunk_frames()).unwrap_or(0);
            let mut pending: Vec<f32> = Vec::with_capacity(resample_chunk * 2);
            let mut ring = CircularBuffer::new(ring_capacity);

            let stream_config = StreamConfig {
                channels: source_channels,
                sample_rate: cpal::SampleRate(source_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !is_recording.load(Ordering::Relaxed) {
                        return;
                    }

                    // First channel only; averaging halves the level when the
                    // mic is wired to one side of a stereo pair
                    let mono = data.chunks(source_channels as usize).map(|frame| frame[0]);

                    match resampler.as_mut() {
                        Some(resampler) => {
                            pending.extend(mono);
                            while pending.len() >= resample_chunk {
                                let chunk: Vec<f32> = pending.drain(..resample_chunk).collect();
                                match resampler.process(&chunk) {
                                    Ok(resampled) => {
                                        ring.write(&resampled);
                                    }
                                    Err(e) => {
                                        warn!("Capture resampling error: {}", e);
                                        return;
                                    }
                                }
                            }
                        }
                        None => {
                            let samples: Vec<f32> = mono.collect();
                            let written = ring.write(&samples);
                            if written < samples.len() {
                                warn!("Capture ring full, dropped {} samples", samples.len() - written);
                            }
                        }
                    }

                    while let Some(block) = ring.read_block(blocksize) {
                        total_frames.fetch_add(block.len(), Ordering::Relaxed);
                        blocks_emitted.fetch_add(1, Ordering::Relaxed);
                        on_block(block);
                    }
                },
                |err| {
                    warn!("Capture stream error: {}", err);
                },
                None,
            )?;

            Ok((
                stream,
                OpenedInput {
                    device_name,
                    source_rate,
                    source_channels,
                },
            ))
        });

        match spawned {
            Ok((stream, opened)) => {
                info!(
                    "Capture started on '{}': {} Hz x{} -> {} Hz mono, {}-sample blocks",
                    opened.device_name,
                    opened.source_rate,
                    opened.source_channels,
                    target_rate,
                    blocksize
                );
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.is_recording.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        self.is_recording.store(false, Ordering::Relaxed);

        if let Some(mut stream) = self.stream.take() {
            stream.release();
            let frames = self.total_frames.load(Ordering::Relaxed);
            info!(
                "Capture stopped: {} frames ({:.2}s)",
                frames,
                frames as f32 / self.config.sample_rate as f32
            );
        }
    }

    fn is_active(&self) -> bool {
        self.is_recording.load(Ordering::Relaxed)
            && self.stream.as_ref().map(|s| s.is_running()).unwrap_or(false)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
