//! Local wake-word detection boundary.
//!
//! The router feeds every waiting-mode frame to a [`WakeWordEngine`]. When the
//! engine finalises an utterance, its [`WakeResult`] carries per-word end
//! offsets measured from the moment that engine instance received its first
//! sample. Those offsets drive lag compensation, so the controller installs a
//! fresh instance from the [`WakeEngineFactory`] after every session.

pub mod energy;

pub use energy::{EnergyWakeConfig, EnergyWakeEngine};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Timing of one recognised word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    /// Seconds from the engine's first sample to the end of this word.
    pub end_offset_secs: f64,
}

/// A finalised local recognition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WakeResult {
    pub text: String,
    pub words: Vec<WordTiming>,
}

impl WakeResult {
    /// End offset of the last word, if any timing was reported.
    pub fn last_word_end(&self) -> Option<f64> {
        self.words.last().map(|w| w.end_offset_secs)
    }

    /// Whether the recognised text is exactly `keyword` (trimmed, any case).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        let text = self.text.trim();
        !text.is_empty() && text.eq_ignore_ascii_case(keyword.trim())
    }
}

/// Contract for local, low-latency keyword recognisers.
pub trait WakeWordEngine: Send + 'static {
    /// Push PCM samples. Returns `true` when an utterance was finalised and
    /// [`result`](Self::result) has something to report.
    fn accept_waveform(&mut self, samples: &[i16]) -> bool;

    /// Take the finalised result.
    fn result(&mut self) -> WakeResult;
}

/// Builds fresh engine instances with their sample clock at zero.
pub trait WakeEngineFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Box<dyn WakeWordEngine>>;
}

impl<F> WakeEngineFactory for F
where
    F: Fn() -> Result<Box<dyn WakeWordEngine>> + Send + Sync + 'static,
{
    fn create(&self) -> Result<Box<dyn WakeWordEngine>> {
        self()
    }
}
