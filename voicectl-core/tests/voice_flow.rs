use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};

use voicectl_core::audio::{AudioSource, MemorySource};
use voicectl_core::{
    Calibration, CloudSpeechEngine, CommandArgs, ControllerConfig, ControllerEvent,
    ControllerHooks, ControllerStatus, NoiseFloor, PushStream, Result, RouterConfig,
    SessionEvents, VoiceController, VoiceError, WakeResult, WakeWordEngine, WordTiming,
};

const RATE: u32 = 16_000;
const FRAME: usize = 1_600;

// ── Wake engine double ───────────────────────────────────────────────────────

/// Fires once after `fire_after` samples, reporting a word ending at `word_end`.
struct ScriptedWake {
    seen: usize,
    script: Option<(usize, usize)>,
}

impl WakeWordEngine for ScriptedWake {
    fn accept_waveform(&mut self, samples: &[i16]) -> bool {
        self.seen += samples.len();
        matches!(self.script, Some((fire_after, _)) if self.seen >= fire_after)
    }

    fn result(&mut self) -> WakeResult {
        let Some((_, word_end)) = self.script.take() else {
            return WakeResult::default();
        };
        WakeResult {
            text: "Computer".into(),
            words: vec![WordTiming {
                word: "computer".into(),
                end_offset_secs: word_end as f64 / RATE as f64,
            }],
        }
    }
}

/// Hands out one scripted engine per `create()`; silent engines afterwards.
fn wake_factory(
    scripts: Vec<(usize, usize)>,
) -> impl Fn() -> Result<Box<dyn WakeWordEngine>> + Send + Sync + 'static {
    let queue = Mutex::new(VecDeque::from(scripts));
    move || {
        Ok(Box::new(ScriptedWake {
            seen: 0,
            script: queue.lock().pop_front(),
        }) as Box<dyn WakeWordEngine>)
    }
}

// ── Cloud engine double ──────────────────────────────────────────────────────

#[derive(Clone)]
enum Outcome {
    /// Recognise `text` once this many samples were pushed.
    Recognize(usize, &'static str),
    CancelOnFirstWrite(&'static str),
    FailToStart,
}

#[derive(Clone, Default)]
struct ScriptedCloud {
    outcomes: Arc<Mutex<VecDeque<Outcome>>>,
    /// Audio received per session.
    sessions: Arc<Mutex<Vec<Arc<Mutex<Vec<i16>>>>>>,
}

impl ScriptedCloud {
    fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::from(outcomes))),
            sessions: Arc::default(),
        }
    }

    fn session_audio(&self, idx: usize) -> Vec<i16> {
        self.sessions.lock()[idx].lock().clone()
    }
}

struct ScriptedStream {
    outcome: Outcome,
    events: SessionEvents,
    audio: Arc<Mutex<Vec<i16>>>,
}

impl PushStream for ScriptedStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let mut audio = self.audio.lock();
        audio.extend_from_slice(samples);
        match self.outcome {
            Outcome::Recognize(after, text) if audio.len() >= after => self.events.recognized(text),
            Outcome::CancelOnFirstWrite(reason) => self.events.canceled(reason),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        self.events.stopped();
    }
}

impl CloudSpeechEngine for ScriptedCloud {
    fn start_session(&self, events: SessionEvents) -> Result<Box<dyn PushStream>> {
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(Outcome::CancelOnFirstWrite("unscripted session"));
        if let Outcome::FailToStart = outcome {
            return Err(VoiceError::CloudSession("service unavailable".into()));
        }
        let audio = Arc::new(Mutex::new(Vec::new()));
        self.sessions.lock().push(Arc::clone(&audio));
        Ok(Box::new(ScriptedStream {
            outcome,
            events,
            audio,
        }))
    }
}

// ── Sources ──────────────────────────────────────────────────────────────────

fn ramp(start: usize, len: usize) -> Vec<i16> {
    (start..start + len).map(|i| (i % 30_000) as i16).collect()
}

/// Memory source that stops at `pause_at` until the controller has been
/// triggered and has returned to listening.
struct GatedSource {
    inner: MemorySource,
    pause_at: Option<usize>,
    delivered: usize,
    events: broadcast::Receiver<ControllerEvent>,
}

impl GatedSource {
    fn wait_for_rearm(&mut self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut triggered = false;
        loop {
            match self.events.try_recv() {
                Ok(ControllerEvent::Triggered { .. }) => triggered = true,
                Ok(ControllerEvent::Status {
                    status: ControllerStatus::Listening,
                    ..
                }) if triggered => return Ok(()),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return Err(VoiceError::AudioStream("gate timed out".into()));
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(TryRecvError::Closed) => {
                    return Err(VoiceError::AudioStream("event channel closed".into()))
                }
            }
        }
    }
}

impl AudioSource for GatedSource {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        if self.pause_at == Some(self.delivered) {
            self.pause_at = None;
            self.wait_for_rearm()?;
        }
        let n = self.inner.read_frame(buf)?;
        self.delivered += n;
        Ok(n)
    }
}

/// Silence forever, at roughly real time.
struct EndlessSilence;

impl AudioSource for EndlessSilence {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        thread::sleep(Duration::from_millis(2));
        buf.clear();
        buf.resize(160, 0);
        Ok(buf.len())
    }
}

/// Fails on the third read.
struct BrokenSource {
    reads: usize,
}

impl AudioSource for BrokenSource {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        self.reads += 1;
        if self.reads >= 3 {
            return Err(VoiceError::AudioStream("device unplugged".into()));
        }
        buf.clear();
        buf.resize(FRAME, 0);
        Ok(buf.len())
    }
}

// ── Hooks ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingHooks {
    log: Mutex<Vec<String>>,
}

impl RecordingHooks {
    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl ControllerHooks for RecordingHooks {
    fn on_ready(&self) {
        self.log.lock().push("ready".into());
    }
    fn on_triggered(&self) {
        self.log.lock().push("triggered".into());
    }
    fn on_begin_command(&self, name: &str, args: &CommandArgs) {
        self.log.lock().push(format!("begin {name} [{args}]"));
    }
    fn on_finish_command(&self, name: &str, _args: &CommandArgs) {
        self.log.lock().push(format!("finish {name}"));
    }
    fn on_unknown_command(&self, text: &str) {
        self.log.lock().push(format!("unknown {text}"));
    }
    fn on_error(&self, error: &VoiceError) {
        self.log.lock().push(format!("error {error}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> ControllerConfig {
    ControllerConfig {
        router: RouterConfig {
            sample_rate: RATE,
            ring_secs: 4.0,
            splice_cap_secs: 4.0,
            wake_word: "computer".into(),
            ..RouterConfig::default()
        },
        frame_size: FRAME,
        calibration: None,
    }
}

fn memory(len: usize) -> Box<dyn AudioSource> {
    Box::new(MemorySource::new(ramp(0, len), RATE, FRAME))
}

fn record_into(
    log: &Arc<Mutex<Vec<String>>>,
    var: &'static str,
) -> impl voicectl_core::CommandHandler {
    let log = Arc::clone(log);
    move |args: &CommandArgs| -> anyhow::Result<()> {
        log.lock().push(args.get(var).unwrap_or("-").to_string());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn wake_word_to_chained_dispatch_with_exact_recovery() {
    let word_end = 16_000;
    let cloud = ScriptedCloud::new(vec![Outcome::Recognize(
        8_000,
        "turn on lights, and then turn off fan.",
    )]);
    let hooks = Arc::new(RecordingHooks::default());
    let mut controller =
        VoiceController::new(config(), wake_factory(vec![(19_200, word_end)]), cloud.clone())
            .with_hooks(hooks.clone());

    let handled = Arc::new(Mutex::new(Vec::new()));
    controller
        .add_command("turn on $device", record_into(&handled, "device"))
        .unwrap();
    controller
        .add_command("turn off $device", record_into(&handled, "device"))
        .unwrap();

    controller.start(|| Ok(memory(48_000))).unwrap();
    controller.join().unwrap();

    assert_eq!(*handled.lock(), vec!["lights", "fan"]);
    assert_eq!(
        hooks.log(),
        vec![
            "ready",
            "triggered",
            r#"begin turn on $device [device="lights"]"#,
            "finish turn on $device",
            r#"begin turn off $device [device="fan"]"#,
            "finish turn off $device",
        ]
    );

    // The cloud stream starts exactly at the end of the wake word and has no
    // gaps or repeats, however far the router ran ahead of the processing thread.
    let audio = cloud.session_audio(0);
    assert!(audio.len() >= 8_000);
    assert_eq!(audio, ramp(word_end, audio.len()));
    assert_eq!(controller.status(), ControllerStatus::Stopped);
}

#[test]
fn calibration_window_sets_the_floor_and_is_not_routed() {
    let floor = NoiseFloor::new();
    let config = ControllerConfig {
        calibration: Some(Calibration {
            window_secs: 0.5,
            floor: floor.clone(),
        }),
        ..config()
    };
    let cloud = ScriptedCloud::new(vec![Outcome::Recognize(4_800, "turn on fan")]);
    let mut controller =
        VoiceController::new(config, wake_factory(vec![(19_200, 16_000)]), cloud.clone());
    let handled = Arc::new(Mutex::new(Vec::new()));
    controller
        .add_command("turn on $device", record_into(&handled, "device"))
        .unwrap();

    // Half a second of steady hum at 0.1 RMS, then the ramp.
    let mut samples = vec![3_277i16; 8_000];
    samples.extend(ramp(0, 48_000));
    controller
        .start(move || {
            Ok(Box::new(MemorySource::new(samples, RATE, FRAME)) as Box<dyn AudioSource>)
        })
        .unwrap();
    // The window is measured before start() returns.
    let level = floor.get().expect("floor calibrated");
    assert!((level - 0.1).abs() < 1e-3, "level={level}");
    controller.join().unwrap();

    assert_eq!(*handled.lock(), vec!["fan"]);
    // Word offsets are on the routed clock, which starts after the hum.
    let audio = cloud.session_audio(0);
    assert_eq!(audio, ramp(16_000, audio.len()));
}

#[test]
fn canceled_session_reports_error_and_rearms() {
    let cloud = ScriptedCloud::new(vec![
        Outcome::CancelOnFirstWrite("network down"),
        Outcome::Recognize(3_200, "turn on fan"),
    ]);
    let hooks = Arc::new(RecordingHooks::default());
    let mut controller = VoiceController::new(
        config(),
        wake_factory(vec![(8_000, 6_400), (8_000, 4_800)]),
        cloud.clone(),
    )
    .with_hooks(hooks.clone());

    let handled = Arc::new(Mutex::new(Vec::new()));
    controller
        .add_command("turn on $device", record_into(&handled, "device"))
        .unwrap();

    let events = controller.subscribe_events();
    controller
        .start(move || {
            Ok(Box::new(GatedSource {
                inner: MemorySource::new(ramp(0, 32_000), RATE, FRAME),
                pause_at: Some(8_000),
                delivered: 0,
                events,
            }) as Box<dyn AudioSource>)
        })
        .unwrap();
    controller.join().unwrap();

    assert_eq!(*handled.lock(), vec!["fan"]);
    let log = hooks.log();
    assert_eq!(log[0], "ready");
    assert_eq!(log[1], "triggered");
    assert_eq!(log[2], "error cloud session error: network down");
    assert_eq!(log[3], "triggered");

    // The first session spliced exactly the audio after its wake word.
    assert_eq!(cloud.session_audio(0), ramp(6_400, 1_600));

    // The second engine started at sample 8000 and its word ended 4800 later.
    let second = cloud.session_audio(1);
    assert!(second.len() >= 3_200);
    assert_eq!(second, ramp(8_000 + 4_800, second.len()));
}

#[test]
fn cloud_start_failure_releases_the_session_slot() {
    let cloud = ScriptedCloud::new(vec![Outcome::FailToStart]);
    let hooks = Arc::new(RecordingHooks::default());
    let controller = VoiceController::new(config(), wake_factory(vec![(3_200, 1_600)]), cloud)
        .with_hooks(hooks.clone());

    controller.start(|| Ok(memory(16_000))).unwrap();
    controller.join().unwrap();

    assert_eq!(
        hooks.log(),
        vec!["ready", "error cloud session error: service unavailable"]
    );
}

#[test]
fn unknown_utterance_reaches_the_hook() {
    let cloud = ScriptedCloud::new(vec![Outcome::Recognize(1, "open the pod bay doors")]);
    let hooks = Arc::new(RecordingHooks::default());
    let controller = VoiceController::new(config(), wake_factory(vec![(3_200, 3_200)]), cloud)
        .with_hooks(hooks.clone());

    controller.start(|| Ok(memory(16_000))).unwrap();
    controller.join().unwrap();

    assert_eq!(
        hooks.log(),
        vec!["ready", "triggered", "unknown open the pod bay doors"]
    );
}

#[test]
fn lifecycle_errors() {
    let mut controller =
        VoiceController::new(config(), wake_factory(vec![]), ScriptedCloud::default());
    assert!(matches!(controller.stop(), Err(VoiceError::NotRunning)));

    controller
        .start(|| Ok(Box::new(EndlessSilence) as Box<dyn AudioSource>))
        .unwrap();
    assert!(controller.is_running());
    assert!(matches!(
        controller.start(|| Ok(Box::new(EndlessSilence) as Box<dyn AudioSource>)),
        Err(VoiceError::AlreadyRunning)
    ));
    assert!(matches!(
        controller.add_command("late", |_: &CommandArgs| -> anyhow::Result<()> { Ok(()) }),
        Err(VoiceError::AlreadyRunning)
    ));

    controller.stop().unwrap();
    controller.join().unwrap();
    assert_eq!(controller.status(), ControllerStatus::Stopped);

    // Threads are gone, so the registry is exclusively owned again.
    controller
        .add_command("late", |_: &CommandArgs| -> anyhow::Result<()> { Ok(()) })
        .unwrap();
}

#[test]
fn source_open_failure_is_returned_from_start() {
    let controller =
        VoiceController::new(config(), wake_factory(vec![]), ScriptedCloud::default());
    let err = controller
        .start(|| Err(VoiceError::NoDefaultInputDevice))
        .unwrap_err();
    assert!(matches!(err, VoiceError::NoDefaultInputDevice));
    assert!(!controller.is_running());
    assert_eq!(controller.status(), ControllerStatus::Error);
}

#[test]
fn source_rate_must_match_router_rate() {
    let controller =
        VoiceController::new(config(), wake_factory(vec![]), ScriptedCloud::default());
    let err = controller
        .start(|| {
            Ok(Box::new(MemorySource::new(vec![0; 100], 44_100, FRAME)) as Box<dyn AudioSource>)
        })
        .unwrap_err();
    assert!(matches!(err, VoiceError::AudioStream(_)));
}

#[test]
fn read_error_ends_the_loop_and_is_reported() {
    let hooks = Arc::new(RecordingHooks::default());
    let controller =
        VoiceController::new(config(), wake_factory(vec![]), ScriptedCloud::default())
            .with_hooks(hooks.clone());

    controller
        .start(|| Ok(Box::new(BrokenSource { reads: 0 }) as Box<dyn AudioSource>))
        .unwrap();
    let err = controller.join().unwrap_err();
    assert!(err.to_string().contains("device unplugged"));
    assert!(!controller.is_running());
    assert_eq!(controller.status(), ControllerStatus::Error);
    assert_eq!(hooks.log().last().unwrap(), "error audio stream error: device unplugged");
}

#[test]
fn dispatch_without_audio_emits_events() {
    let mut controller =
        VoiceController::new(config(), wake_factory(vec![]), ScriptedCloud::default());
    let handled = Arc::new(Mutex::new(Vec::new()));
    controller
        .add_command("play $song...", record_into(&handled, "song"))
        .unwrap();
    let mut events = controller.subscribe_events();

    let report = controller.dispatch("play one and then two");
    assert_eq!(report.handled, vec!["play $song..."]);
    assert_eq!(*handled.lock(), vec!["one and then two"]);

    let first = events.try_recv().expect("begin event");
    assert!(
        matches!(first, ControllerEvent::BeginCommand { ref name, .. } if name == "play $song...")
    );
    let second = events.try_recv().expect("finish event");
    assert!(second.seq() > first.seq());
}
