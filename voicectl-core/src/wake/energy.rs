//! `EnergyWakeEngine`: placeholder detector with no acoustic model.
//!
//! Any isolated burst of voiced audio whose length falls inside
//! `[min_burst_secs, max_burst_secs]` is reported as the configured keyword.
//! Good enough to exercise the full trigger → cloud → dispatch path on a
//! development machine; swap in a real keyword spotter for anything else.

use tracing::debug;

use super::{WakeResult, WakeWordEngine, WordTiming};
use crate::vad::{AdaptiveThreshold, EnergyVad, VoiceActivityDetector};

#[derive(Debug, Clone)]
pub struct EnergyWakeConfig {
    /// Text reported for an accepted burst.
    pub keyword: String,
    pub sample_rate: u32,
    /// Normalised RMS above which a frame counts as voiced.
    pub threshold: f32,
    /// Raises `threshold` to a multiple of the calibrated room noise.
    pub adaptive: Option<AdaptiveThreshold>,
    /// Silent frames that may interrupt a burst without ending it.
    pub hangover_frames: u32,
    pub min_burst_secs: f64,
    pub max_burst_secs: f64,
}

impl Default for EnergyWakeConfig {
    fn default() -> Self {
        Self {
            keyword: "computer".into(),
            sample_rate: 16_000,
            threshold: 0.02,
            adaptive: None,
            hangover_frames: 3,
            min_burst_secs: 0.25,
            max_burst_secs: 1.5,
        }
    }
}

pub struct EnergyWakeEngine {
    config: EnergyWakeConfig,
    vad: EnergyVad,
    /// Samples accepted since construction; the clock for word offsets.
    samples_seen: u64,
    burst_start: Option<u64>,
    last_voiced_end: u64,
    pending: Option<WakeResult>,
}

impl EnergyWakeEngine {
    pub fn new(config: EnergyWakeConfig) -> Self {
        let vad = EnergyVad::new(config.threshold, config.hangover_frames)
            .with_adaptive(config.adaptive.clone());
        Self {
            config,
            vad,
            samples_seen: 0,
            burst_start: None,
            last_voiced_end: 0,
            pending: None,
        }
    }

    fn secs(&self, samples: u64) -> f64 {
        samples as f64 / self.config.sample_rate.max(1) as f64
    }
}

impl WakeWordEngine for EnergyWakeEngine {
    fn accept_waveform(&mut self, samples: &[i16]) -> bool {
        let frame_start = self.samples_seen;
        self.samples_seen += samples.len() as u64;

        if self.vad.classify(samples).is_speech() {
            self.burst_start.get_or_insert(frame_start);
            // Hangover frames extend the burst but not its voiced end.
            if self.vad.last_was_voiced() {
                self.last_voiced_end = self.samples_seen;
            }
            return false;
        }

        let Some(begin) = self.burst_start.take() else {
            return false;
        };
        let duration = self.secs(self.last_voiced_end.saturating_sub(begin));
        if duration < self.config.min_burst_secs || duration > self.config.max_burst_secs {
            debug!(duration_secs = duration, "burst rejected");
            return false;
        }

        let end_offset_secs = self.secs(self.last_voiced_end);
        debug!(duration_secs = duration, end_offset_secs, "burst accepted as keyword");
        self.pending = Some(WakeResult {
            text: self.config.keyword.clone(),
            words: vec![WordTiming {
                word: self.config.keyword.clone(),
                end_offset_secs,
            }],
        });
        true
    }

    fn result(&mut self) -> WakeResult {
        self.pending.take().unwrap_or_default()
    }
}
