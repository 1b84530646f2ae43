//! Microphone → session → speaker conversation orchestration
//!
//! A [`Conversation`] owns at most one live session at a time together with
//! the capture device, the playback scheduler and the transcript. The capture
//! thread only encodes and queues blocks; everything the session sends back is
//! handled by a single consumer task.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use parley_audio::{
    AudioBackend, AudioConfig, AudioError, CaptureDevice, EncodedAudioPayload, OutputConfig,
    OutputDevice, PlaybackScheduler, SourceId,
};
use parley_session::{
    Connector, InboundEvent, SessionConfig, SessionHandle, SessionSender, SessionState, Speaker,
    TranscriptAggregator, TranscriptEntry, TranscriptSnapshot, TranscriptUpdate,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("A conversation is already active")]
    AlreadyActive,

    #[error("Microphone unavailable: {0}")]
    Capture(AudioError),

    #[error("Speaker unavailable: {0}")]
    Playback(AudioError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Conversation was stopped while connecting")]
    Cancelled,

    #[error("Audio device setup aborted: {0}")]
    DeviceSetup(String),
}

/// User-facing status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ConversationStatus {
    Disconnected,
    Connecting,
    Listening,
    Error(String),
}

impl ConversationStatus {
    /// Coarse connection flag for UI controls
    pub fn connection_state(&self) -> &'static str {
        match self {
            ConversationStatus::Connecting => "connecting",
            ConversationStatus::Listening => "active",
            ConversationStatus::Disconnected | ConversationStatus::Error(_) => "idle",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ConversationStatus::Connecting | ConversationStatus::Listening)
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Disconnected => write!(f, "disconnected"),
            ConversationStatus::Connecting => write!(f, "connecting"),
            ConversationStatus::Listening => write!(f, "listening"),
            ConversationStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

/// Change notifications for observers (UI bridge, tests)
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationUpdate {
    StatusChanged(ConversationStatus),
    SessionStarted(u64),
    SessionEnded(u64),
    /// Full accumulated partial text for one speaker
    Partial { speaker: Speaker, text: String },
    Committed(TranscriptEntry),
}

/// Everything needed to open one conversation's devices and session
#[derive(Debug, Clone, Default)]
pub struct ConversationSettings {
    pub session: SessionConfig,
    pub capture: AudioConfig,
    pub output: OutputConfig,
}

/// Why a live conversation is being torn down
enum Ending {
    Requested,
    RemoteClosed,
    Failed(String),
}

impl Ending {
    fn into_status(self, generation: u64) -> ConversationStatus {
        match self {
            Ending::Requested => {
                info!("Conversation {} stopped", generation);
                ConversationStatus::Disconnected
            }
            Ending::RemoteClosed => {
                info!("Conversation {} closed by remote", generation);
                ConversationStatus::Disconnected
            }
            Ending::Failed(reason) => {
                error!("Conversation {} failed: {}", generation, reason);
                ConversationStatus::Error(reason)
            }
        }
    }
}

struct Shared {
    status: ConversationStatus,
    transcript: TranscriptAggregator,
}

/// Devices and session opened for one start, not yet installed
struct Acquired<B: AudioBackend> {
    session: SessionHandle,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    ended: mpsc::UnboundedReceiver<SourceId>,
    capture: B::Capture,
    scheduler: Arc<Mutex<PlaybackScheduler<B::Output>>>,
}

struct Live<B: AudioBackend> {
    generation: u64,
    session: SessionHandle,
    capture: Option<B::Capture>,
    scheduler: Arc<Mutex<PlaybackScheduler<B::Output>>>,
    consumer: Option<JoinHandle<()>>,
}

enum Slot<B: AudioBackend> {
    Empty,
    /// Reserved while devices open off the async runtime
    Acquiring(u64),
    Live(Live<B>),
}

impl<B: AudioBackend> Slot<B> {
    fn generation(&self) -> Option<u64> {
        match self {
            Slot::Empty => None,
            Slot::Acquiring(generation) => Some(*generation),
            Slot::Live(live) => Some(live.generation),
        }
    }
}

/// Session close, capture stop, playback stop, device release
fn release<C: CaptureDevice, O: OutputDevice>(
    session: &SessionHandle,
    mut capture: Option<C>,
    scheduler: &Mutex<PlaybackScheduler<O>>,
) {
    session.close();
    if let Some(capture) = capture.as_mut() {
        capture.stop();
    }
    let mut scheduler = scheduler.lock();
    scheduler.stop_all();
    drop(capture);
    scheduler.close();
}

struct Inner<B: AudioBackend, C: Connector> {
    backend: B,
    connector: Arc<C>,
    settings: ConversationSettings,
    shared: Mutex<Shared>,
    live: Mutex<Slot<B>>,
    updates: broadcast::Sender<ConversationUpdate>,
    generation: AtomicU64,
}

/// Handle to one conversation slot. Clones share the same state.
pub struct Conversation<B: AudioBackend, C: Connector> {
    inner: Arc<Inner<B, C>>,
}

impl<B: AudioBackend, C: Connector> Clone for Conversation<B, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AudioBackend, C: Connector> Conversation<B, C> {
    pub fn new(backend: B, connector: C, settings: ConversationSettings) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                backend,
                connector: Arc::new(connector),
                settings,
                shared: Mutex::new(Shared {
                    status: ConversationStatus::Disconnected,
                    transcript: TranscriptAggregator::new(),
                }),
                live: Mutex::new(Slot::Empty),
                updates,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire devices, open a session and resolve once it is open.
    ///
    /// Rejected with `AlreadyActive` while another conversation is live.
    pub async fn start(&self) -> Result<(), ConversationError> {
        let (generation, opened) = Arc::clone(&self.inner).launch().await?;
        let state = opened.wait_open().await;

        match state {
            SessionState::Open => {
                if !self.inner.mark_listening(generation) {
                    return Err(ConversationError::Cancelled);
                }
                info!("Conversation {} listening", generation);
                Ok(())
            }
            SessionState::Errored => {
                let reason = opened
                    .failure()
                    .unwrap_or_else(|| "session failed to open".to_string());
                self.inner.teardown(generation, Ending::Failed(reason.clone()), false);
                Err(ConversationError::ConnectionFailed(reason))
            }
            _ => {
                self.inner.teardown(generation, Ending::Requested, false);
                Err(ConversationError::Cancelled)
            }
        }
    }

    /// Tear down the live conversation, if any. Idempotent.
    pub fn stop(&self) {
        let current = self.inner.live.lock().generation();
        match current {
            Some(generation) => self.inner.teardown(generation, Ending::Requested, false),
            None => debug!("Stop requested with no live conversation"),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(*self.inner.live.lock(), Slot::Empty)
    }

    pub fn status(&self) -> ConversationStatus {
        self.inner.shared.lock().status.clone()
    }

    pub fn connection_state(&self) -> &'static str {
        self.inner.shared.lock().status.connection_state()
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        self.inner.shared.lock().transcript.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationUpdate> {
        self.inner.updates.subscribe()
    }

    /// Id of the live conversation (increments on every start)
    pub fn current_session_id(&self) -> Option<u64> {
        self.inner.live.lock().generation()
    }
}

impl<B: AudioBackend, C: Connector> Inner<B, C> {
    /// Reserve the slot, open devices and session, then install the live
    /// conversation. The slot lock is never held while a device opens.
    async fn launch(self: Arc<Self>) -> Result<(u64, SessionSender), ConversationError> {
        let generation = self.reserve()?;

        let acquiring = Arc::clone(&self);
        let acquired = match tokio::task::spawn_blocking(move || acquiring.acquire()).await {
            Ok(Ok(acquired)) => acquired,
            Ok(Err(e)) => {
                self.abandon(generation, &e);
                return Err(e);
            }
            Err(e) => {
                let e = ConversationError::DeviceSetup(e.to_string());
                self.abandon(generation, &e);
                return Err(e);
            }
        };

        let mut slot = self.live.lock();
        if !matches!(*slot, Slot::Acquiring(reserved) if reserved == generation) {
            drop(slot);
            debug!("Conversation {} stopped while opening devices", generation);
            release(&acquired.session, Some(acquired.capture), &acquired.scheduler);
            return Err(ConversationError::Cancelled);
        }

        let opened = acquired.session.sender();
        let consumer = tokio::spawn(consume(
            Arc::clone(&self),
            generation,
            acquired.events,
            acquired.ended,
            Arc::clone(&acquired.scheduler),
        ));
        *slot = Slot::Live(Live {
            generation,
            session: acquired.session,
            capture: Some(acquired.capture),
            scheduler: acquired.scheduler,
            consumer: Some(consumer),
        });
        let _ = self.updates.send(ConversationUpdate::SessionStarted(generation));
        drop(slot);

        info!("Conversation {} connecting", generation);
        Ok((generation, opened))
    }

    fn reserve(&self) -> Result<u64, ConversationError> {
        let mut slot = self.live.lock();
        if !matches!(*slot, Slot::Empty) {
            return Err(ConversationError::AlreadyActive);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *slot = Slot::Acquiring(generation);
        self.shared.lock().transcript.reset();
        self.set_status(ConversationStatus::Connecting);
        Ok(generation)
    }

    /// Blocking device work: microphone, speaker, session, capture start.
    fn acquire(&self) -> Result<Acquired<B>, ConversationError> {
        let mut capture = self.backend.open_capture(&self.settings.capture).map_err(|e| {
            warn!("Capture acquisition failed: {}", e);
            ConversationError::Capture(e)
        })?;

        let (ended_tx, ended) = mpsc::unbounded_channel::<SourceId>();
        let output = match self.backend.open_output(
            &self.settings.output,
            Arc::new(move |id| {
                let _ = ended_tx.send(id);
            }),
        ) {
            Ok(output) => output,
            Err(e) => {
                warn!("Output acquisition failed: {}", e);
                capture.stop();
                return Err(ConversationError::Playback(e));
            }
        };
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(output, 1)));

        let (session, events) =
            parley_session::open(Arc::clone(&self.connector), self.settings.session.clone());

        let sender = session.sender();
        let capture_rate = self.settings.capture.sample_rate;
        let started = capture.start(Arc::new(move |block: Vec<f32>| {
            sender.send(EncodedAudioPayload::pcm16(&block, capture_rate));
        }));
        if let Err(e) = started {
            warn!("Capture start failed: {}", e);
            release(&session, Some(capture), &scheduler);
            return Err(ConversationError::Capture(e));
        }

        Ok(Acquired {
            session,
            events,
            ended,
            capture,
            scheduler,
        })
    }

    /// Give up a reservation whose device setup failed
    fn abandon(&self, generation: u64, error: &ConversationError) {
        let mut slot = self.live.lock();
        if matches!(*slot, Slot::Acquiring(reserved) if reserved == generation) {
            *slot = Slot::Empty;
            self.set_status(ConversationStatus::Error(error.to_string()));
        }
    }

    /// Report Listening unless `generation` was torn down first. The check
    /// and the write share the slot lock, so a concurrent teardown's status
    /// is never overwritten.
    fn mark_listening(&self, generation: u64) -> bool {
        let slot = self.live.lock();
        if slot.generation() != Some(generation) {
            return false;
        }
        self.set_status(ConversationStatus::Listening);
        true
    }

    /// Release everything belonging to `generation`, in order: session close,
    /// capture stop, playback stop, device release. A stale generation is a
    /// no-op, which makes concurrent stop / error / remote-close safe.
    fn teardown(&self, generation: u64, ending: Ending, from_consumer: bool) {
        let mut live = {
            let mut slot = self.live.lock();
            if slot.generation() != Some(generation) {
                return;
            }
            let taken = std::mem::replace(&mut *slot, Slot::Empty);
            self.set_status(ending.into_status(generation));
            match taken {
                Slot::Live(live) => live,
                // `launch` releases whatever it opened once it sees the empty slot
                _ => return,
            }
        };

        release(&live.session, live.capture.take(), &live.scheduler);

        if !from_consumer {
            if let Some(consumer) = live.consumer.take() {
                consumer.abort();
            }
        }

        let _ = self.updates.send(ConversationUpdate::SessionEnded(generation));
    }

    fn set_status(&self, status: ConversationStatus) {
        {
            let mut shared = self.shared.lock();
            if shared.status == status {
                return;
            }
            shared.status = status.clone();
        }
        debug!("Conversation status: {}", status);
        let _ = self.updates.send(ConversationUpdate::StatusChanged(status));
    }

    fn apply_transcript(&self, event: &InboundEvent) {
        let update = self.shared.lock().transcript.apply(event);
        match update {
            TranscriptUpdate::Unchanged => {}
            TranscriptUpdate::Partial { speaker, text } => {
                let _ = self
                    .updates
                    .send(ConversationUpdate::Partial { speaker, text });
            }
            TranscriptUpdate::Committed(entries) => {
                for entry in entries {
                    let _ = self.updates.send(ConversationUpdate::Committed(entry));
                }
            }
        }
    }
}

/// The single consumer of one session's inbound events and the output
/// device's completion notifications.
async fn consume<B: AudioBackend, C: Connector>(
    inner: Arc<Inner<B, C>>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    mut ended: mpsc::UnboundedReceiver<SourceId>,
    scheduler: Arc<Mutex<PlaybackScheduler<B::Output>>>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    // Session task finished without a terminal event (local close)
                    inner.teardown(generation, Ending::Requested, true);
                    break;
                };

                match event {
                    InboundEvent::PartialUserTranscript(_)
                    | InboundEvent::PartialModelTranscript(_)
                    | InboundEvent::TurnComplete => inner.apply_transcript(&event),
                    InboundEvent::AudioChunk { data, sample_rate } => {
                        let scheduled = scheduler.lock().on_audio_chunk(&data, sample_rate);
                        match scheduled {
                            Ok(_) => {}
                            Err(AudioError::MalformedPayload(reason)) => {
                                warn!("Dropping malformed audio chunk: {}", reason);
                            }
                            Err(e) => warn!("Failed to schedule audio chunk: {}", e),
                        }
                    }
                    InboundEvent::Interrupted => {
                        debug!("Model interrupted, flushing playback");
                        scheduler.lock().stop_all();
                    }
                    InboundEvent::SessionError(reason) => {
                        inner.teardown(generation, Ending::Failed(reason), true);
                        break;
                    }
                    InboundEvent::SessionClosed => {
                        inner.teardown(generation, Ending::RemoteClosed, true);
                        break;
                    }
                }
            }
            Some(id) = ended.recv() => {
                scheduler.lock().source_ended(id);
            }
        }
    }
    debug!("Consumer for conversation {} finished", generation);
}
