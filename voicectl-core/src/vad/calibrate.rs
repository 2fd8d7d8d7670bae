//! Ambient-noise calibration.
//!
//! Before the router starts listening, the controller reads a short window of
//! room noise and publishes its RMS through a [`NoiseFloor`]. Energy gates
//! that hold the same handle then raise their threshold to
//! `noise_rms × factor` whenever that exceeds their configured minimum.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// Shared, lock-free ambient noise level. Unset until calibrated.
#[derive(Debug, Clone, Default)]
pub struct NoiseFloor(Arc<AtomicU32>);

impl NoiseFloor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a measured RMS level. Negative and non-finite levels clear it.
    pub fn set(&self, rms: f32) {
        let rms = if rms.is_finite() { rms.max(0.0) } else { 0.0 };
        self.0.store(rms.to_bits(), Ordering::Relaxed);
    }

    /// The measured level, or `None` before calibration.
    pub fn get(&self) -> Option<f32> {
        let rms = f32::from_bits(self.0.load(Ordering::Relaxed));
        (rms > 0.0).then_some(rms)
    }
}

/// Threshold that follows a [`NoiseFloor`].
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    pub floor: NoiseFloor,
    /// Multiple of the noise RMS a frame must reach to count as voiced.
    pub factor: f32,
}

impl AdaptiveThreshold {
    /// `max(minimum, noise_rms × factor)`; just `minimum` before calibration.
    pub fn resolve(&self, minimum: f32) -> f32 {
        match self.floor.get() {
            Some(rms) => minimum.max(rms * self.factor),
            None => minimum,
        }
    }
}

/// Accumulates whole frames until a window is covered and reports their RMS.
#[derive(Debug, Clone)]
pub struct AmbientCalibrator {
    target: usize,
    seen: usize,
    sum_sq: f64,
}

impl AmbientCalibrator {
    pub fn new(sample_rate: u32, window_secs: f32) -> Self {
        Self {
            target: (sample_rate as f32 * window_secs.max(0.0)).round() as usize,
            seen: 0,
            sum_sq: 0.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.seen >= self.target
    }

    pub fn push(&mut self, frame: &[i16]) {
        self.sum_sq += frame
            .iter()
            .map(|&s| {
                let f = f64::from(s) / 32768.0;
                f * f
            })
            .sum::<f64>();
        self.seen += frame.len();
    }

    /// Samples measured so far.
    pub fn samples(&self) -> usize {
        self.seen
    }

    /// RMS of everything pushed so far, normalised to full scale 1.0.
    pub fn level(&self) -> f32 {
        if self.seen == 0 {
            return 0.0;
        }
        (self.sum_sq / self.seen as f64).sqrt() as f32
    }
}
