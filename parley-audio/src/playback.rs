//! Gapless playback scheduling
//!
//! Response audio arrives in chunks of irregular size at irregular intervals.
//! The scheduler keeps a single "next free start time" and places every chunk
//! at `max(next_start_time, device_now)`, so chunks play back-to-back when a
//! backlog exists and never start in the past.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::codec::{self, DecodedAudio};
use crate::error::Result;

/// Identifies one scheduled buffer on an output device
pub type SourceId = u64;

/// Invoked by an output device when a source has finished playing
pub type EndedCallback = Arc<dyn Fn(SourceId) + Send + Sync>;

/// An audio sink with its own clock.
///
/// Time is in seconds on the device's clock, which only moves forward while
/// the device renders audio.
pub trait OutputDevice: Send {
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> u32;
    fn start_source(&mut self, id: SourceId, start_time: f64, audio: &DecodedAudio) -> Result<()>;
    /// Silence and forget every scheduled source without reporting them ended.
    fn stop_all(&mut self);
    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// One decoded buffer bound to the output device
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSource {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

impl PlaybackSource {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

pub struct PlaybackScheduler<O: OutputDevice> {
    output: O,
    channels: u16,
    next_start_time: f64,
    live: BTreeMap<SourceId, PlaybackSource>,
    next_id: SourceId,
}

impl<O: OutputDevice> PlaybackScheduler<O> {
    /// `channels` is the channel count of inbound chunks (1 for the response stream).
    pub fn new(output: O, channels: u16) -> Self {
        let next_start_time = output.current_time();
        Self {
            output,
            channels,
            next_start_time,
            live: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Decode an inbound base64 chunk and schedule it.
    ///
    /// Returns `Ok(None)` for an empty chunk. A malformed chunk schedules
    /// nothing and leaves the clock untouched.
    pub fn on_audio_chunk(&mut self, data: &str, sample_rate: u32) -> Result<Option<PlaybackSource>> {
        let audio = codec::decode(data, sample_rate, self.channels)?;
        self.schedule(audio)
    }

    /// Schedule already-decoded audio.
    pub fn schedule(&mut self, audio: DecodedAudio) -> Result<Option<PlaybackSource>> {
        if audio.frames() == 0 {
            return Ok(None);
        }

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = audio.duration();
        let id = self.next_id;

        self.output.start_source(id, start_time, &audio)?;
        self.next_id += 1;

        let source = PlaybackSource {
            id,
            start_time,
            duration,
        };
        self.live.insert(id, source.clone());
        self.next_start_time = start_time + duration;

        debug!(
            "Scheduled source {} at {:.3}s for {:.3}s (device at {:.3}s, {} live)",
            id,
            start_time,
            duration,
            now,
            self.live.len()
        );

        Ok(Some(source))
    }

    /// Completion notification from the device. Returns false for sources that
    /// were already removed (e.g. by `stop_all`).
    pub fn source_ended(&mut self, id: SourceId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Halt every live source and rewind the clock to the device's present.
    pub fn stop_all(&mut self) {
        self.output.stop_all();
        let halted = self.live.len();
        self.live.clear();
        self.next_start_time = self.output.current_time();
        if halted > 0 {
            debug!("Stopped {} live playback source(s)", halted);
        }
    }

    /// Release the output device; anything still scheduled is dropped.
    pub fn close(&mut self) {
        self.live.clear();
        self.output.close();
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_sources(&self) -> impl Iterator<Item = &PlaybackSource> {
        self.live.values()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::error::AudioError;
    use approx::assert_abs_diff_eq;

    #[derive(Default)]
    struct FakeOutput {
        now: f64,
        started: Vec<(SourceId, f64, f64)>,
        stop_all_calls: usize,
        closed: bool,
    }

    impl OutputDevice for FakeOutput {
        fn current_time(&self) -> f64 {
            self.now
        }

        fn sample_rate(&self) -> u32 {
            24000
        }

        fn start_source(&mut self, id: SourceId, start_time: f64, audio: &DecodedAudio) -> Result<()> {
            self.started.push((id, start_time, audio.duration()));
            Ok(())
        }

        fn stop_all(&mut self) {
            self.stop_all_calls += 1;
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn chunk(seconds: f64) -> String {
        encode(&vec![0.1; (seconds * 24000.0).round() as usize])
    }

    #[test]
    fn test_three_chunks_arriving_faster_than_real_time_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput { now: 2.0, ..Default::default() }, 1);
        let t0 = 2.0;

        let mut starts = Vec::new();
        for i in 0..3 {
            scheduler.output_mut().now = t0 + 0.1 * i as f64;
            let source = scheduler.on_audio_chunk(&chunk(0.5), 24000).unwrap().unwrap();
            starts.push(source.start_time);
        }

        assert_abs_diff_eq!(starts[0], t0, epsilon = 1e-9);
        assert_abs_diff_eq!(starts[1], t0 + 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(starts[2], t0 + 1.0, epsilon = 1e-9);
        assert_eq!(scheduler.live_count(), 3);
    }

    #[test]
    fn test_gapless_invariant_for_arbitrary_arrivals() {
        // (arrival device time, duration)
        let arrivals = [
            (0.0, 0.25),
            (0.0, 0.5),
            (0.1, 0.04),
            (2.0, 0.3),
            (2.05, 0.3),
            (2.05, 0.01),
            (10.0, 1.0),
            (10.999, 0.5),
        ];

        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        let mut previous: Option<PlaybackSource> = None;

        for (arrival, duration) in arrivals {
            scheduler.output_mut().now = arrival;
            let source = scheduler.on_audio_chunk(&chunk(duration), 24000).unwrap().unwrap();

            assert!(source.start_time >= arrival, "Never schedule in the past");
            if let Some(prev) = previous {
                if prev.end_time() >= arrival {
                    assert_abs_diff_eq!(source.start_time, prev.end_time(), epsilon = 1e-9);
                } else {
                    assert_abs_diff_eq!(source.start_time, arrival, epsilon = 1e-9);
                }
            }
            assert!(scheduler.next_start_time() >= scheduler.current_time());
            previous = Some(source);
        }
    }

    #[test]
    fn test_malformed_chunk_is_not_scheduled() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        scheduler.on_audio_chunk(&chunk(0.5), 24000).unwrap();

        let odd = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8, 2, 3]);
        let err = scheduler.on_audio_chunk(&odd, 24000).unwrap_err();
        assert!(matches!(err, AudioError::MalformedPayload(_)));

        assert_eq!(scheduler.live_count(), 1);
        assert_abs_diff_eq!(scheduler.next_start_time(), 0.5, epsilon = 1e-9);

        // Later chunks still play after the good one
        let next = scheduler.on_audio_chunk(&chunk(0.25), 24000).unwrap().unwrap();
        assert_abs_diff_eq!(next.start_time, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        assert!(scheduler.on_audio_chunk("", 24000).unwrap().is_none());
        assert_eq!(scheduler.live_count(), 0);
        assert!(scheduler.output().started.is_empty());
    }

    #[test]
    fn test_source_ended_removes_from_live_set() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        let a = scheduler.on_audio_chunk(&chunk(0.1), 24000).unwrap().unwrap();
        let b = scheduler.on_audio_chunk(&chunk(0.1), 24000).unwrap().unwrap();

        assert!(scheduler.source_ended(a.id));
        assert!(!scheduler.source_ended(a.id));
        assert_eq!(scheduler.live_sources().map(|s| s.id).collect::<Vec<_>>(), vec![b.id]);
    }

    #[test]
    fn test_stop_all_clears_and_rewinds_clock() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        for _ in 0..4 {
            scheduler.on_audio_chunk(&chunk(1.0), 24000).unwrap();
        }
        assert_abs_diff_eq!(scheduler.next_start_time(), 4.0, epsilon = 1e-9);

        scheduler.output_mut().now = 1.5;
        scheduler.stop_all();

        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(scheduler.output().stop_all_calls, 1);
        assert_abs_diff_eq!(scheduler.next_start_time(), 1.5, epsilon = 1e-9);

        // Sources reported ended after a stop are unknown
        assert!(!scheduler.source_ended(0));

        let next = scheduler.on_audio_chunk(&chunk(0.2), 24000).unwrap().unwrap();
        assert_abs_diff_eq!(next.start_time, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_close_releases_output() {
        let mut scheduler = PlaybackScheduler::new(FakeOutput::default(), 1);
        scheduler.on_audio_chunk(&chunk(0.2), 24000).unwrap();
        scheduler.close();
        assert!(scheduler.output().closed);
        assert_eq!(scheduler.live_count(), 0);
    }
}
