//! Session lifecycle
//!
//! [`open`] spawns one task per session. The task owns the transport and is
//! the only writer of the session state; callers hold a [`SessionHandle`]
//! (state, close) and any number of [`SessionSender`]s (outbound audio).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parley_audio::EncodedAudioPayload;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::events::{InboundEvent, SessionState};
use crate::protocol;
use crate::transport::{Connector, Transport};

/// Open a session. Returns immediately in `Connecting`; inbound events arrive
/// on the returned receiver in the order the endpoint sent them.
pub fn open<C: Connector>(
    connector: Arc<C>,
    config: SessionConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<InboundEvent>) {
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (close_tx, close_rx) = watch::channel(false);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let dropped = Arc::new(AtomicU64::new(0));
    let failure = Arc::new(OnceLock::new());

    let sender = SessionSender {
        outbound: outbound_tx,
        state: state_rx.clone(),
        closing: close_rx.clone(),
        dropped: Arc::clone(&dropped),
        failure: Arc::clone(&failure),
    };

    let task = SessionTask {
        config,
        state_tx,
        close_rx,
        outbound_rx,
        event_tx,
        pending: VecDeque::new(),
        dropped,
        failure: Arc::clone(&failure),
    };
    let join = tokio::spawn(task.run(connector));

    (
        SessionHandle {
            state: state_rx,
            close_tx,
            sender,
            task: Some(join),
        },
        event_rx,
    )
}

/// Outbound capability. Cheap to clone; safe to call from the capture thread.
#[derive(Clone)]
pub struct SessionSender {
    outbound: mpsc::Sender<EncodedAudioPayload>,
    state: watch::Receiver<SessionState>,
    closing: watch::Receiver<bool>,
    dropped: Arc<AtomicU64>,
    failure: Arc<OnceLock<String>>,
}

impl SessionSender {
    /// Queue one audio block. Never blocks.
    ///
    /// A full queue drops this block; a closing or finished session ignores it.
    pub fn send(&self, payload: EncodedAudioPayload) {
        if *self.closing.borrow() || self.state.borrow().is_terminal() {
            return;
        }

        match self.outbound.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 50 == 0 {
                    warn!("Outbound queue full, {} frame(s) dropped so far", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Resolve once the session has left `Connecting`.
    pub async fn wait_open(&self) -> SessionState {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !matches!(s, SessionState::Idle | SessionState::Connecting))
            .await
            .map(|s| *s);
        match settled {
            Ok(s) => s,
            Err(_) => *self.state.borrow(),
        }
    }

    /// Why the session errored, once it has
    pub fn failure(&self) -> Option<String> {
        self.failure.get().cloned()
    }
}

pub struct SessionHandle {
    state: watch::Receiver<SessionState>,
    close_tx: watch::Sender<bool>,
    sender: SessionSender,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch channel following every state transition
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    pub fn send(&self, payload: EncodedAudioPayload) {
        self.sender.send(payload);
    }

    /// Frames lost to backpressure or pre-open overflow
    pub fn dropped_frames(&self) -> u64 {
        self.sender.dropped.load(Ordering::Relaxed)
    }

    /// Resolve once the session has left `Connecting`.
    pub async fn wait_open(&self) -> SessionState {
        self.sender.wait_open().await
    }

    /// Why the session errored, once it has
    pub fn failure(&self) -> Option<String> {
        self.sender.failure()
    }

    /// Ask the session to close. Idempotent; valid in every state.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    /// Wait for the session task to finish after `close()` or a terminal event.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

struct SessionTask {
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    close_rx: watch::Receiver<bool>,
    outbound_rx: mpsc::Receiver<EncodedAudioPayload>,
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    pending: VecDeque<EncodedAudioPayload>,
    dropped: Arc<AtomicU64>,
    failure: Arc<OnceLock<String>>,
}

enum Step {
    Continue,
    Finished,
}

impl SessionTask {
    async fn run<C: Connector>(mut self, connector: Arc<C>) {
        let mut transport = {
            let config = self.config.clone();
            let connect = connector.connect(&config);
            tokio::pin!(connect);

            loop {
                tokio::select! {
                    biased;
                    _ = close_requested(&mut self.close_rx) => {
                        info!("Session closed while connecting");
                        self.set_state(SessionState::Closed);
                        return;
                    }
                    result = &mut connect => match result {
                        Ok(transport) => break transport,
                        Err(e) => {
                            self.fail(format!("connect failed: {}", e));
                            return;
                        }
                    },
                    Some(payload) = self.outbound_rx.recv() => self.hold(payload),
                }
            }
        };

        match protocol::setup_frame(&self.config) {
            Ok(setup) => {
                if let Err(e) = transport.send_text(setup).await {
                    self.fail(format!("setup failed: {}", e));
                    let _ = transport.close().await;
                    return;
                }
                debug!("Setup sent for {}", self.config.model);
            }
            Err(e) => {
                self.fail(format!("setup failed: {}", e));
                let _ = transport.close().await;
                return;
            }
        }

        loop {
            let step = tokio::select! {
                biased;
                _ = close_requested(&mut self.close_rx) => {
                    if let Err(e) = transport.close().await {
                        debug!("Transport close: {}", e);
                    }
                    self.set_state(SessionState::Closed);
                    info!("Session closed");
                    Step::Finished
                }
                message = transport.next_message() => self.on_message(&mut transport, message).await,
                Some(payload) = self.outbound_rx.recv() => self.on_outbound(&mut transport, payload).await,
            };

            if let Step::Finished = step {
                break;
            }
        }
    }

    async fn on_message<T: Transport>(
        &mut self,
        transport: &mut T,
        message: Option<crate::error::Result<String>>,
    ) -> Step {
        let raw = match message {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                self.fail(e.to_string());
                let _ = transport.close().await;
                return Step::Finished;
            }
            None => {
                if self.state() == SessionState::Connecting {
                    self.fail("connection closed before setup completed".to_string());
                } else {
                    info!("Session closed by remote");
                    self.set_state(SessionState::Closed);
                    let _ = self.event_tx.send(InboundEvent::SessionClosed);
                }
                return Step::Finished;
            }
        };

        let frame = match protocol::decode_server_message(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping unparseable server message: {}", e);
                return Step::Continue;
            }
        };

        if let Some(reason) = frame.error {
            self.fail(format!("endpoint error: {}", reason));
            let _ = transport.close().await;
            return Step::Finished;
        }

        if frame.setup_complete && self.state() == SessionState::Connecting {
            self.set_state(SessionState::Open);
            info!("Session open ({} buffered frame(s))", self.pending.len());
            while let Some(payload) = self.pending.pop_front() {
                if let Step::Finished = self.send_payload(transport, &payload).await {
                    return Step::Finished;
                }
            }
        }

        if let Some(time_left) = frame.go_away {
            warn!("Endpoint will disconnect soon (time left: {})", time_left);
        }

        for event in frame.events {
            let _ = self.event_tx.send(event);
        }
        Step::Continue
    }

    async fn on_outbound<T: Transport>(&mut self, transport: &mut T, payload: EncodedAudioPayload) -> Step {
        match self.state() {
            SessionState::Open => self.send_payload(transport, &payload).await,
            SessionState::Connecting => {
                self.hold(payload);
                Step::Continue
            }
            _ => Step::Continue,
        }
    }

    async fn send_payload<T: Transport>(&mut self, transport: &mut T, payload: &EncodedAudioPayload) -> Step {
        let frame = match protocol::realtime_input_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unserializable audio frame: {}", e);
                return Step::Continue;
            }
        };

        if let Err(e) = transport.send_text(frame).await {
            self.fail(format!("send failed: {}", e));
            let _ = transport.close().await;
            return Step::Finished;
        }
        Step::Continue
    }

    /// Buffer a frame until the session opens, dropping the oldest when full.
    fn hold(&mut self, payload: EncodedAudioPayload) {
        if self.config.preopen_buffer == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.pending.len() >= self.config.preopen_buffer {
            self.pending.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.pending.push_back(payload);
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Session state: {} -> {}", previous, state);
        }
    }

    fn fail(&mut self, reason: String) {
        error!("Session error: {}", reason);
        self.pending.clear();
        let _ = self.failure.set(reason.clone());
        self.set_state(SessionState::Errored);
        let _ = self.event_tx.send(InboundEvent::SessionError(reason));
    }
}

async fn close_requested(close_rx: &mut watch::Receiver<bool>) {
    // A dropped handle counts as a close request
    let _ = close_rx.wait_for(|closed| *closed).await;
}
