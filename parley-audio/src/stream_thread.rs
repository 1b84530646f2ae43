//! Dedicated owner thread for cpal streams
//!
//! `cpal::Stream` is neither `Send` nor `Sync`, so a stream cannot live inside
//! a handle that async code moves between tasks. Each stream is instead built,
//! played and finally dropped on its own thread; the handle only keeps the
//! stop signal and the join handle.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::StreamTrait;
use tracing::debug;

use crate::error::{AudioError, Result};

pub(crate) struct StreamThread {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn a thread that runs `build`, starts the returned stream and keeps
    /// it alive until [`release`](Self::release).
    ///
    /// Blocks until the stream is playing or has failed to start; any failure
    /// is returned and the thread exits without holding a device.
    pub(crate) fn spawn<T, F>(name: &str, build: F) -> Result<(Self, T)>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<T>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let (stream, info) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }

                if ready_tx.send(Ok(info)).is_err() {
                    return;
                }

                // Returns on explicit stop or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("{}: stream released", thread_name);
            })?;

        let info = match ready_rx.recv() {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::Internal(format!(
                    "{} exited before reporting stream status",
                    name
                )));
            }
        };

        Ok((
            Self {
                name: name.to_string(),
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            info,
        ))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop and drop the stream. Safe to call repeatedly.
    pub(crate) fn release(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("{}: stream thread panicked during shutdown", self.name);
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.release();
    }
}
