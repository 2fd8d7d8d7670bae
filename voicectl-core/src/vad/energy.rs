//! Energy gate with hangover.
//!
//! A frame whose normalised RMS reaches the threshold is speech and reloads
//! the hangover count. Quieter frames still count as speech while the count
//! lasts, so short dips between syllables do not split a burst. With an
//! [`AdaptiveThreshold`] attached, the configured threshold is a minimum and
//! the calibrated noise floor may raise it.

use super::{AdaptiveThreshold, VadDecision, VoiceActivityDetector};
use crate::buffering::pcm::pcm16_rms;

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    hangover_frames: u32,
    remaining_hangover: u32,
    last_level: f32,
    last_threshold: f32,
    adaptive: Option<AdaptiveThreshold>,
}

impl EnergyVad {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            remaining_hangover: 0,
            last_level: 0.0,
            last_threshold: threshold,
            adaptive: None,
        }
    }

    pub fn with_adaptive(mut self, adaptive: Option<AdaptiveThreshold>) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Threshold the next frame will be compared against.
    pub fn threshold(&self) -> f32 {
        match &self.adaptive {
            Some(adaptive) => adaptive.resolve(self.threshold),
            None => self.threshold,
        }
    }

    /// Whether the last frame was above threshold on its own, not by hangover.
    pub fn last_was_voiced(&self) -> bool {
        self.last_level >= self.last_threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, 8)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &[i16]) -> VadDecision {
        self.last_level = pcm16_rms(frame);
        self.last_threshold = self.threshold();
        if self.last_was_voiced() {
            self.remaining_hangover = self.hangover_frames;
            return VadDecision::Speech;
        }
        if self.remaining_hangover > 0 {
            self.remaining_hangover -= 1;
            return VadDecision::Speech;
        }
        VadDecision::Silence
    }
}
