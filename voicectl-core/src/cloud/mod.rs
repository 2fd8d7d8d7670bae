//! Cloud transcription boundary.
//!
//! A session starts when the wake word fires. The router writes the recovered
//! lag segment and then every live frame into the session's [`PushStream`];
//! the engine reports exactly one terminal [`SessionEvent`] through the
//! [`SessionEvents`] handle it was given.

#[cfg(feature = "cloud-http")]
pub mod http;

#[cfg(feature = "cloud-http")]
pub use http::{HttpCloudConfig, HttpCloudEngine};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::error::Result;

/// Terminal outcome of one cloud session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Recognized(String),
    Canceled(String),
    Stopped,
}

/// Sink for session audio. `write` must not block on network I/O.
pub trait PushStream: Send + 'static {
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Signal that no more audio will follow. Called once, after the
    /// terminal event has been handled.
    fn close(&mut self);
}

/// Contract for remote recognisers.
pub trait CloudSpeechEngine: Send + Sync + 'static {
    fn start_session(&self, events: SessionEvents) -> Result<Box<dyn PushStream>>;
}

/// Reporting handle for one session. Clones share a once-only latch, so only
/// the first terminal event is delivered.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: Sender<SessionEvent>,
    fired: Arc<AtomicBool>,
}

impl SessionEvents {
    /// Create a handle and the receiver the session thread waits on.
    pub fn channel() -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                tx,
                fired: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn recognized(&self, text: impl Into<String>) {
        self.emit(SessionEvent::Recognized(text.into()));
    }

    pub fn canceled(&self, reason: impl Into<String>) {
        self.emit(SessionEvent::Canceled(reason.into()));
    }

    pub fn stopped(&self) {
        self.emit(SessionEvent::Stopped);
    }

    pub fn is_finished(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!(?event, "dropping extra terminal event");
            return;
        }
        // The receiver is gone only when the controller was torn down.
        let _ = self.tx.send(event);
    }
}
