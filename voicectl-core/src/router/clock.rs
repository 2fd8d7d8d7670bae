//! Clock used to measure how far the live stream has moved past a wake word.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How elapsed time since the clock epoch is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Count samples routed since the epoch. Exact for any source, including
    /// file replay running faster than real time.
    #[default]
    Samples,
    /// Monotonic wall clock, started by the first routed frame so source
    /// open latency is not counted.
    Wall,
}

#[derive(Debug, Clone)]
pub struct SyncClock {
    mode: ClockMode,
    sample_rate: u32,
    epoch: Option<Instant>,
    samples: u64,
}

impl SyncClock {
    pub fn new(mode: ClockMode, sample_rate: u32) -> Self {
        Self {
            mode,
            sample_rate: sample_rate.max(1),
            epoch: None,
            samples: 0,
        }
    }

    /// Record `n` samples routed. The first call after construction starts
    /// the wall epoch at the beginning of that frame.
    pub fn advance(&mut self, n: usize) {
        if self.epoch.is_none() {
            let frame = Duration::from_secs_f64(n as f64 / self.sample_rate as f64);
            let now = Instant::now();
            self.epoch = Some(now.checked_sub(frame).unwrap_or(now));
        }
        self.samples += n as u64;
    }

    pub fn reset(&mut self) {
        self.epoch = Some(Instant::now());
        self.samples = 0;
    }

    pub fn elapsed_secs(&self) -> f64 {
        match self.mode {
            ClockMode::Samples => self.samples as f64 / self.sample_rate as f64,
            ClockMode::Wall => match self.epoch {
                Some(epoch) => epoch.elapsed().as_secs_f64(),
                None => 0.0,
            },
        }
    }
}

/// Samples of live audio that arrived after the wake word ended.
///
/// `elapsed − word_end − missed / rate`, rounded to whole samples, clamped to
/// `[0, capacity]`.
pub fn compute_lag(
    elapsed_secs: f64,
    word_end_secs: f64,
    missed_frames: u64,
    sample_rate: u32,
    capacity: usize,
) -> usize {
    let rate = sample_rate.max(1) as f64;
    let lag_secs = elapsed_secs - word_end_secs - missed_frames as f64 / rate;
    let lag = (lag_secs * rate).round();
    if !lag.is_finite() || lag <= 0.0 {
        return 0;
    }
    (lag as usize).min(capacity)
}
