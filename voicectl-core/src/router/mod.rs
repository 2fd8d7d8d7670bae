//! `AudioRouter`: the synchronization state machine between the local wake
//! engine and the cloud push stream.
//!
//! ## States
//!
//! ```text
//!                 detection (processing thread)
//!   WaitingForWakeword ─────────────────────────► RecordingCommand
//!     frames → RingBuffer + WakeWordEngine          frames → PushStream
//!          ▲                                        missed_frames += n
//!          └──────────── session finished ──────────────┘
//!                 fresh engine, stream closed
//! ```
//!
//! ## Lag compensation
//!
//! A detection is raised on the router thread but handled on the processing
//! thread, after a cloud session has been opened. Meanwhile live frames keep
//! landing in the ring buffer. Under the router lock the processing thread
//! computes
//!
//! ```text
//! lag = elapsed_since_epoch − word_end − missed_frames / rate
//! ```
//!
//! and writes the newest `lag` samples of the ring into the stream before any
//! live frame, so the cloud engine hears everything after the wake word
//! exactly once. The epoch and `missed_frames` restart at every transition to
//! Recording and the wake engine is replaced at every transition back, which
//! keeps the engine's word offsets and the router's clock on the same origin.

pub mod clock;

pub use clock::{compute_lag, ClockMode, SyncClock};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{buffering::RingBuffer, cloud::PushStream, wake::WakeWordEngine};

/// Which consumer receives live frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum Mode {
    WaitingForWakeword = 0,
    RecordingCommand = 1,
}

/// Lock-free mode flag readable from any thread.
#[derive(Debug)]
pub struct ModeCell(AtomicU8);

impl ModeCell {
    pub fn new(mode: Mode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn load(&self) -> Mode {
        match self.0.load(Ordering::SeqCst) {
            0 => Mode::WaitingForWakeword,
            _ => Mode::RecordingCommand,
        }
    }

    pub fn store(&self, mode: Mode) {
        self.0.store(mode as u8, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub sample_rate: u32,
    /// Seconds of waiting-mode history kept for splicing.
    pub ring_secs: f32,
    /// Longest recovered segment written into a new stream, in seconds.
    pub splice_cap_secs: f32,
    /// Detections whose text differs from this are ignored.
    pub wake_word: String,
    pub clock: ClockMode,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            ring_secs: 2.0,
            splice_cap_secs: 1.0,
            wake_word: "computer".into(),
            clock: ClockMode::Samples,
        }
    }
}

impl RouterConfig {
    pub fn splice_cap_samples(&self) -> usize {
        (self.splice_cap_secs.max(0.0) * self.sample_rate as f32).round() as usize
    }
}

/// A keyword hit raised by the router thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    /// End of the wake word on the engine's sample clock.
    pub word_end_secs: f64,
    /// Engine generation that produced the hit. Stale hits are dropped.
    pub generation: u64,
}

/// What `begin_recording` wrote into the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceReport {
    pub lag_samples: usize,
    pub spliced_samples: usize,
}

/// Monotonic counters for observability.
#[derive(Debug, Default)]
pub struct RouterDiagnostics {
    frames_routed: AtomicU64,
    detections: AtomicU64,
    sessions: AtomicU64,
    spliced_samples: AtomicU64,
    stream_write_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_routed: u64,
    pub detections: u64,
    pub sessions: u64,
    pub spliced_samples: u64,
    pub stream_write_errors: u64,
}

impl RouterDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            spliced_samples: self.spliced_samples.load(Ordering::Relaxed),
            stream_write_errors: self.stream_write_errors.load(Ordering::Relaxed),
        }
    }
}

struct RouterState {
    ring: RingBuffer,
    engine: Box<dyn WakeWordEngine>,
    stream: Option<Box<dyn PushStream>>,
    clock: SyncClock,
    generation: u64,
}

/// Shared by the router, processing and session threads behind an `Arc`.
pub struct AudioRouter {
    config: RouterConfig,
    mode: ModeCell,
    /// Set while a session is in flight; guards against re-triggering.
    active: AtomicBool,
    /// Samples routed to the stream since the last transition to Recording.
    missed_frames: AtomicU64,
    state: Mutex<RouterState>,
    diagnostics: RouterDiagnostics,
}

impl AudioRouter {
    pub fn new(config: RouterConfig, engine: Box<dyn WakeWordEngine>) -> Self {
        let state = RouterState {
            ring: RingBuffer::with_duration(config.sample_rate, config.ring_secs),
            engine,
            stream: None,
            clock: SyncClock::new(config.clock, config.sample_rate),
            generation: 0,
        };
        Self {
            config,
            mode: ModeCell::new(Mode::WaitingForWakeword),
            active: AtomicBool::new(false),
            missed_frames: AtomicU64::new(0),
            state: Mutex::new(state),
            diagnostics: RouterDiagnostics::default(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.mode.load()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn missed_frames(&self) -> u64 {
        self.missed_frames.load(Ordering::SeqCst)
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Route one frame. Returns a detection when the wake engine recognised
    /// the configured keyword.
    ///
    /// The mode is read under the state lock so a frame can never slip
    /// between the splice and the stream install.
    pub fn on_frame(&self, frame: &[i16]) -> Option<Detection> {
        if frame.is_empty() {
            return None;
        }
        self.diagnostics.frames_routed.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.clock.advance(frame.len());

        match self.mode.load() {
            Mode::WaitingForWakeword => {
                state.ring.extend(frame);
                if !state.engine.accept_waveform(frame) {
                    return None;
                }
                let result = state.engine.result();
                if !result.is_keyword(&self.config.wake_word) {
                    // Local near-misses are silent.
                    debug!(text = %result.text, "wake engine result is not the keyword");
                    return None;
                }
                let Some(word_end_secs) = result.last_word_end() else {
                    warn!(text = %result.text, "keyword reported without word timing");
                    return None;
                };
                self.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
                Some(Detection {
                    text: result.text,
                    word_end_secs,
                    generation: state.generation,
                })
            }
            Mode::RecordingCommand => {
                self.missed_frames
                    .fetch_add(frame.len() as u64, Ordering::SeqCst);
                if let Some(stream) = state.stream.as_mut() {
                    if let Err(e) = stream.write(frame) {
                        self.diagnostics
                            .stream_write_errors
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "push stream write failed");
                    }
                }
                None
            }
        }
    }

    /// Claim the single session slot for `detection`.
    ///
    /// Returns `false` when a session is already active or the detection came
    /// from an engine that has since been replaced.
    pub fn try_activate(&self, detection: &Detection) -> bool {
        if detection.generation != self.state.lock().generation {
            debug!(generation = detection.generation, "stale detection dropped");
            return false;
        }
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Give the slot back without recording (the cloud session failed to open).
    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Splice the lag segment into `stream`, install it and switch to Recording.
    pub fn begin_recording(
        &self,
        detection: &Detection,
        mut stream: Box<dyn PushStream>,
    ) -> SpliceReport {
        let mut state = self.state.lock();

        let capacity = state.ring.capacity();
        let lag_samples = compute_lag(
            state.clock.elapsed_secs(),
            detection.word_end_secs,
            self.missed_frames.load(Ordering::SeqCst),
            self.config.sample_rate,
            capacity,
        );

        let cap = self.config.splice_cap_samples();
        if lag_samples > cap {
            warn!(lag_samples, cap, "lag exceeds splice cap, dropping the oldest recovered audio");
        }
        let window = state.ring.latest(lag_samples.min(cap));

        if !window.is_empty() {
            if let Err(e) = stream.write(&window) {
                self.diagnostics
                    .stream_write_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to write recovered audio into push stream");
            }
        }

        state.stream = Some(stream);
        state.clock.reset();
        self.missed_frames.store(0, Ordering::SeqCst);
        self.mode.store(Mode::RecordingCommand);
        drop(state);

        self.diagnostics.sessions.fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .spliced_samples
            .fetch_add(window.len() as u64, Ordering::Relaxed);
        info!(
            lag_samples,
            spliced = window.len(),
            word_end_secs = detection.word_end_secs,
            "recording command"
        );

        SpliceReport {
            lag_samples,
            spliced_samples: window.len(),
        }
    }

    /// Return to waiting: install `fresh_engine` (if any), close the stream,
    /// flip the mode and release the session slot.
    pub fn finish_session(&self, fresh_engine: Option<Box<dyn WakeWordEngine>>) {
        let mut state = self.state.lock();
        match fresh_engine {
            Some(engine) => state.engine = engine,
            None => warn!("keeping previous wake engine; word offsets may drift"),
        }
        state.generation += 1;
        if let Some(mut stream) = state.stream.take() {
            stream.close();
        }
        self.mode.store(Mode::WaitingForWakeword);
        drop(state);

        self.active.store(false, Ordering::SeqCst);
        debug!("waiting for wake word");
    }

    /// Close any open stream without touching the session slot. Used on shutdown.
    pub fn close_stream(&self) {
        if let Some(mut stream) = self.state.lock().stream.take() {
            stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        error::Result,
        wake::{WakeResult, WordTiming},
    };

    const RATE: u32 = 16_000;
    const FRAME: usize = 400;

    /// Fires once, when `fire_after` samples have been accepted, reporting a
    /// word that ended at `word_end` samples.
    struct ScriptedWake {
        seen: usize,
        fire_after: usize,
        word_end: usize,
        text: String,
        fired: bool,
    }

    impl ScriptedWake {
        fn new(fire_after: usize, word_end: usize) -> Self {
            Self {
                seen: 0,
                fire_after,
                word_end,
                text: "computer".into(),
                fired: false,
            }
        }
    }

    impl WakeWordEngine for ScriptedWake {
        fn accept_waveform(&mut self, samples: &[i16]) -> bool {
            self.seen += samples.len();
            !self.fired && self.seen >= self.fire_after
        }

        fn result(&mut self) -> WakeResult {
            self.fired = true;
            WakeResult {
                text: self.text.clone(),
                words: vec![WordTiming {
                    word: self.text.clone(),
                    end_offset_secs: self.word_end as f64 / RATE as f64,
                }],
            }
        }
    }

    #[derive(Clone, Default)]
    struct Capture {
        samples: Arc<Mutex<Vec<i16>>>,
        closed: Arc<AtomicBool>,
    }

    impl PushStream for Capture {
        fn write(&mut self, samples: &[i16]) -> Result<()> {
            self.samples.lock().extend_from_slice(samples);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Sample `i` of a signal with no repeated values inside the test windows.
    fn ramp(start: usize, len: usize) -> Vec<i16> {
        (start..start + len).map(|i| (i % 30_000) as i16).collect()
    }

    fn router(engine: ScriptedWake) -> AudioRouter {
        AudioRouter::new(RouterConfig::default(), Box::new(engine))
    }

    /// Feed frames of the ramp starting at `*pos` until one raises a detection.
    fn feed_until_detection(router: &AudioRouter, pos: &mut usize) -> Detection {
        loop {
            let frame = ramp(*pos, FRAME);
            *pos += FRAME;
            if let Some(d) = router.on_frame(&frame) {
                return d;
            }
            assert!(*pos < 1_000_000, "engine never fired");
        }
    }

    fn feed(router: &AudioRouter, pos: &mut usize, frames: usize) {
        for _ in 0..frames {
            assert!(router.on_frame(&ramp(*pos, FRAME)).is_none());
            *pos += FRAME;
        }
    }

    #[test]
    fn non_keyword_results_are_ignored() {
        let mut engine = ScriptedWake::new(FRAME, FRAME);
        engine.text = "banana".into();
        let router = router(engine);
        assert!(router.on_frame(&ramp(0, FRAME)).is_none());
        assert_eq!(router.mode(), Mode::WaitingForWakeword);
    }

    #[test]
    fn recovered_audio_is_contiguous_with_live_frames() {
        // Word ends at 1.0 s; the engine finalises 0.2 s later.
        let word_end = 16_000;
        let router = router(ScriptedWake::new(19_200, word_end));
        let mut pos = 0;
        let detection = feed_until_detection(&router, &mut pos);
        assert!(router.try_activate(&detection));

        // Frames keep arriving while the cloud session opens.
        feed(&router, &mut pos, 3);

        let capture = Capture::default();
        let report = router.begin_recording(&detection, Box::new(capture.clone()));
        assert_eq!(report.lag_samples, pos - word_end);
        assert_eq!(router.mode(), Mode::RecordingCommand);

        feed(&router, &mut pos, 5);
        assert_eq!(router.missed_frames(), 5 * FRAME as u64);

        // Everything after the word end, once, in order.
        assert_eq!(*capture.samples.lock(), ramp(word_end, pos - word_end));
    }

    #[test]
    fn second_session_uses_fresh_engine_clock() {
        let router = router(ScriptedWake::new(8_000, 6_000));
        let mut pos = 0;
        let first = feed_until_detection(&router, &mut pos);
        assert!(router.try_activate(&first));
        router.begin_recording(&first, Box::new(Capture::default()));
        feed(&router, &mut pos, 10);

        router.finish_session(Some(Box::new(ScriptedWake::new(12_000, 9_600))));
        assert_eq!(router.mode(), Mode::WaitingForWakeword);
        assert!(!router.is_active());

        let rearmed_at = pos;
        let second = feed_until_detection(&router, &mut pos);
        assert!(router.try_activate(&second));
        feed(&router, &mut pos, 2);

        let capture = Capture::default();
        let report = router.begin_recording(&second, Box::new(capture.clone()));
        let word_end = rearmed_at + 9_600;
        assert_eq!(report.lag_samples, pos - word_end);
        feed(&router, &mut pos, 1);
        assert_eq!(*capture.samples.lock(), ramp(word_end, pos - word_end));
    }

    #[test]
    fn long_lag_keeps_only_the_newest_second() {
        let router = router(ScriptedWake::new(4_000, 2_000));
        let mut pos = 0;
        let detection = feed_until_detection(&router, &mut pos);
        assert!(router.try_activate(&detection));
        feed(&router, &mut pos, 60);

        let capture = Capture::default();
        let report = router.begin_recording(&detection, Box::new(capture.clone()));
        assert_eq!(report.lag_samples, pos - 2_000);
        assert_eq!(report.spliced_samples, RATE as usize);
        assert_eq!(*capture.samples.lock(), ramp(pos - RATE as usize, RATE as usize));
    }

    #[test]
    fn second_activation_is_refused_while_active() {
        let router = router(ScriptedWake::new(FRAME, FRAME));
        let detection = router.on_frame(&ramp(0, FRAME)).unwrap();
        assert!(router.try_activate(&detection));
        assert!(!router.try_activate(&detection));
        router.release();
        assert!(router.try_activate(&detection));
    }

    #[test]
    fn detections_from_a_replaced_engine_are_stale() {
        let router = router(ScriptedWake::new(FRAME, FRAME));
        let detection = router.on_frame(&ramp(0, FRAME)).unwrap();
        assert!(router.try_activate(&detection));
        router.begin_recording(&detection, Box::new(Capture::default()));
        router.finish_session(None);
        assert!(!router.try_activate(&detection));
    }

    #[test]
    fn finishing_closes_the_stream() {
        let router = router(ScriptedWake::new(FRAME, FRAME));
        let detection = router.on_frame(&ramp(0, FRAME)).unwrap();
        assert!(router.try_activate(&detection));
        let capture = Capture::default();
        router.begin_recording(&detection, Box::new(capture.clone()));
        router.finish_session(None);
        assert!(capture.closed.load(Ordering::SeqCst));
    }
}
