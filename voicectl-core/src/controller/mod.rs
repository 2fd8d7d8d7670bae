//! `VoiceController`: top-level lifecycle and thread orchestration.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceController::new()
//!     └─► add_synonyms() / add_command()   registry is still exclusively owned
//!         └─► start(open_source)           router + processing threads spawned
//!             └─► stop() / end of stream   router loop exits
//!                 └─► join()               threads reaped, source dropped
//! ```
//!
//! ## Threads
//!
//! | Thread | Work |
//! |--------|------|
//! | `voicectl-router` | opens the source, reads frames, routes them, raises detections |
//! | `voicectl-processing` | claims the session slot, opens the cloud session, splices lag audio |
//! | `voicectl-session-N` | waits for the cloud result, dispatches, re-arms the wake engine |
//!
//! The source is opened on the router thread because a cpal stream may not
//! cross threads. `start()` blocks until the open succeeds or fails, and, when
//! [`Calibration`] is configured, until the ambient-noise window has been
//! measured. Calibration audio is never routed.

mod notify;
pub mod session;

pub use session::CommandSession;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use self::{notify::Notifier, session::SessionContext};
use crate::{
    audio::AudioSource,
    cloud::{CloudSpeechEngine, SessionEvents},
    command::{CommandArgs, CommandHandler, CommandRegistry, DispatchReport},
    error::{Result, VoiceError},
    ipc::events::{ControllerEvent, ControllerStatus},
    router::{AudioRouter, Detection, DiagnosticsSnapshot, Mode, RouterConfig},
    vad::{AmbientCalibrator, NoiseFloor},
    wake::WakeEngineFactory,
};

/// Broadcast capacity for lifecycle events.
const EVENT_CHANNEL_CAP: usize = 256;

/// Optional observer of controller lifecycle points. Called from the
/// controller's worker threads; keep implementations short.
pub trait ControllerHooks: Send + Sync + 'static {
    fn on_ready(&self);
    fn on_triggered(&self);
    fn on_begin_command(&self, name: &str, args: &CommandArgs);
    fn on_finish_command(&self, name: &str, args: &CommandArgs);
    fn on_unknown_command(&self, text: &str);
    fn on_error(&self, error: &VoiceError);
}

/// Ambient-noise measurement taken when the source opens.
#[derive(Debug, Clone)]
pub struct Calibration {
    /// Seconds of room noise read before listening.
    pub window_secs: f32,
    /// Receives the measured RMS. Engines built with the same handle adapt.
    pub floor: NoiseFloor,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub router: RouterConfig,
    /// Samples per frame read from the source. 1600 = 100 ms at 16 kHz.
    pub frame_size: usize,
    pub calibration: Option<Calibration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            frame_size: 1_600,
            calibration: None,
        }
    }
}

struct Workers {
    router_thread: JoinHandle<Result<()>>,
    processing_thread: JoinHandle<()>,
}

pub struct VoiceController {
    config: ControllerConfig,
    registry: Arc<CommandRegistry>,
    wake_factory: Arc<dyn WakeEngineFactory>,
    cloud: Arc<dyn CloudSpeechEngine>,
    notifier: Notifier,
    running: Arc<AtomicBool>,
    router: Mutex<Option<Arc<AudioRouter>>>,
    workers: Mutex<Option<Workers>>,
}

impl VoiceController {
    pub fn new<W, C>(config: ControllerConfig, wake_factory: W, cloud: C) -> Self
    where
        W: WakeEngineFactory,
        C: CloudSpeechEngine,
    {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Self {
            config,
            registry: Arc::new(CommandRegistry::new()),
            wake_factory: Arc::new(wake_factory),
            cloud: Arc::new(cloud),
            notifier: Notifier::new(events),
            running: Arc::new(AtomicBool::new(false)),
            router: Mutex::new(None),
            workers: Mutex::new(None),
        }
    }

    /// Attach lifecycle hooks. Without hooks, events still go to subscribers.
    pub fn with_hooks(mut self, hooks: Arc<dyn ControllerHooks>) -> Self {
        self.notifier.set_hooks(hooks);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Mutable registry access, only while no worker thread shares it.
    ///
    /// # Errors
    /// `VoiceError::AlreadyRunning` once `start()` has been called and the
    /// threads have not been joined.
    pub fn registry_mut(&mut self) -> Result<&mut CommandRegistry> {
        if self.running.load(Ordering::SeqCst) {
            return Err(VoiceError::AlreadyRunning);
        }
        Arc::get_mut(&mut self.registry).ok_or(VoiceError::AlreadyRunning)
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn add_synonyms<I, S>(&mut self, word: &str, alternatives: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry_mut()?.add_synonyms(word, alternatives)
    }

    /// Compile and register a command. Only legal before `start()`.
    pub fn add_command<H: CommandHandler>(&mut self, pattern: &str, handler: H) -> Result<()> {
        self.registry_mut()?.add_command(pattern, handler)
    }

    /// Run `utterance` through the dispatcher as if the cloud engine had
    /// recognised it. Hooks and events fire as usual.
    pub fn dispatch(&self, utterance: &str) -> DispatchReport {
        self.registry.perform_all_commands(utterance, &self.notifier)
    }

    /// Open the audio source on a new router thread and start listening.
    ///
    /// # Errors
    /// - `VoiceError::AlreadyRunning` if already started.
    /// - Whatever `open_source` or the wake factory return.
    /// - `VoiceError::AudioStream` if the source rate differs from the router rate.
    pub fn start<F>(&self, open_source: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn AudioSource>> + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VoiceError::AlreadyRunning);
        }
        // Reap a previous run that ended on its own.
        if let Err(e) = self.join() {
            debug!(error = %e, "previous run ended with an error");
        }

        let engine = match self.wake_factory.create() {
            Ok(engine) => engine,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let router = Arc::new(AudioRouter::new(self.config.router.clone(), engine));
        let (detection_tx, detection_rx) = crossbeam_channel::unbounded::<Detection>();
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();

        let router_thread = {
            let router = Arc::clone(&router);
            let running = Arc::clone(&self.running);
            let notifier = self.notifier.clone();
            let frame_size = self.config.frame_size;
            let calibration = self.config.calibration.clone();
            thread::Builder::new()
                .name("voicectl-router".into())
                .spawn(move || {
                    run_router(
                        open_source,
                        open_tx,
                        router,
                        detection_tx,
                        running,
                        notifier,
                        frame_size,
                        calibration,
                    )
                })
        };
        let router_thread = match router_thread {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = router_thread.join();
                self.running.store(false, Ordering::SeqCst);
                self.notifier
                    .set_status(ControllerStatus::Error, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let _ = router_thread.join();
                self.running.store(false, Ordering::SeqCst);
                return Err(VoiceError::Other(anyhow::anyhow!(
                    "router thread died before opening the audio source"
                )));
            }
        }

        let processing = ProcessingContext {
            router: Arc::clone(&router),
            registry: Arc::clone(&self.registry),
            wake_factory: Arc::clone(&self.wake_factory),
            cloud: Arc::clone(&self.cloud),
            notifier: self.notifier.clone(),
            running: Arc::clone(&self.running),
        };
        let processing_thread = thread::Builder::new()
            .name("voicectl-processing".into())
            .spawn(move || run_processing(processing, detection_rx));
        let processing_thread = match processing_thread {
            Ok(handle) => handle,
            Err(e) => {
                // Without a processing thread nothing can trigger; shut down.
                self.running.store(false, Ordering::SeqCst);
                let _ = router_thread.join();
                return Err(e.into());
            }
        };

        *self.router.lock() = Some(router);
        *self.workers.lock() = Some(Workers {
            router_thread,
            processing_thread,
        });
        info!("voice controller started");
        Ok(())
    }

    /// Ask the router loop to exit after its current frame.
    ///
    /// # Errors
    /// `VoiceError::NotRunning` if not running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VoiceError::NotRunning);
        }
        info!("voice controller stop requested");
        Ok(())
    }

    /// Wait for the worker threads to exit. Returns the router loop's result.
    ///
    /// Returns immediately when nothing was started.
    pub fn join(&self) -> Result<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Ok(());
        };
        let routed = workers.router_thread.join().unwrap_or_else(|_| {
            Err(VoiceError::Other(anyhow::anyhow!("router thread panicked")))
        });
        if workers.processing_thread.join().is_err() {
            error!("processing thread panicked");
        }
        routed
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ControllerStatus {
        self.notifier.status()
    }

    /// Current router mode, or `None` before the first start.
    pub fn mode(&self) -> Option<Mode> {
        self.router.lock().as_ref().map(|r| r.mode())
    }

    pub fn diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        self.router.lock().as_ref().map(|r| r.diagnostics())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.notifier.subscribe()
    }
}

/// Read at least `window_secs` of audio and publish its RMS as the noise floor.
fn calibrate(
    source: &mut dyn AudioSource,
    frame: &mut Vec<i16>,
    calibration: &Calibration,
    running: &AtomicBool,
) -> Result<()> {
    let mut calibrator = AmbientCalibrator::new(source.sample_rate(), calibration.window_secs);
    while !calibrator.is_complete() && running.load(Ordering::SeqCst) {
        match source.read_frame(frame)? {
            0 => break,
            n => calibrator.push(&frame[..n]),
        }
    }
    calibration.floor.set(calibrator.level());
    info!(
        noise_rms = calibrator.level(),
        samples = calibrator.samples(),
        "ambient noise calibrated"
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_router<F>(
    open_source: F,
    open_tx: mpsc::Sender<Result<()>>,
    router: Arc<AudioRouter>,
    detections: Sender<Detection>,
    running: Arc<AtomicBool>,
    notifier: Notifier,
    frame_size: usize,
    calibration: Option<Calibration>,
) -> Result<()>
where
    F: FnOnce() -> Result<Box<dyn AudioSource>>,
{
    let expected_rate = router.config().sample_rate;
    let mut frame = Vec::with_capacity(frame_size);
    let opened = open_source().and_then(|mut source| {
        if source.sample_rate() != expected_rate {
            return Err(VoiceError::AudioStream(format!(
                "source delivers {} Hz, router expects {expected_rate} Hz",
                source.sample_rate()
            )));
        }
        if let Some(calibration) = &calibration {
            calibrate(&mut *source, &mut frame, calibration, &running)?;
        }
        Ok(source)
    });
    let mut source = match opened {
        Ok(source) => {
            let _ = open_tx.send(Ok(()));
            source
        }
        Err(e) => {
            let message = e.to_string();
            let _ = open_tx.send(Err(e));
            return Err(VoiceError::AudioStream(message));
        }
    };

    notifier.set_status(ControllerStatus::Listening, None);
    notifier.ready();

    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }
        match source.read_frame(&mut frame) {
            Ok(0) => {
                info!("audio source reached end of stream");
                break Ok(());
            }
            Ok(n) => {
                if let Some(detection) = router.on_frame(&frame[..n]) {
                    debug!(word_end_secs = detection.word_end_secs, "wake word detected");
                    if detections.send(detection).is_err() {
                        break Ok(());
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "audio source failed");
                break Err(e);
            }
        }
    };

    running.store(false, Ordering::SeqCst);
    // Lets a pending cloud session endpoint on what it already has.
    router.close_stream();
    match &outcome {
        Ok(()) => notifier.set_status(ControllerStatus::Stopped, None),
        Err(e) => {
            notifier.error(e);
            notifier.set_status(ControllerStatus::Error, Some(e.to_string()));
        }
    }
    outcome
}

struct ProcessingContext {
    router: Arc<AudioRouter>,
    registry: Arc<CommandRegistry>,
    wake_factory: Arc<dyn WakeEngineFactory>,
    cloud: Arc<dyn CloudSpeechEngine>,
    notifier: Notifier,
    running: Arc<AtomicBool>,
}

fn run_processing(ctx: ProcessingContext, detections: Receiver<Detection>) {
    let session_ids = AtomicU64::new(0);
    let mut current: Option<CommandSession> = None;

    for detection in detections.iter() {
        if !ctx.router.try_activate(&detection) {
            debug!("detection ignored while a session is active");
            continue;
        }
        // The slot was free, so any previous session is done with the router.
        if let Some(previous) = current.take() {
            previous.join();
        }

        let (events, results) = SessionEvents::channel();
        let stream = match ctx.cloud.start_session(events) {
            Ok(stream) => stream,
            Err(e) => {
                ctx.router.release();
                ctx.notifier.error(&e);
                continue;
            }
        };
        let report = ctx.router.begin_recording(&detection, stream);
        ctx.notifier
            .transition(ControllerStatus::Listening, ControllerStatus::Recording);
        ctx.notifier.triggered(report);

        let id = session_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let session = CommandSession::start(
            SessionContext {
                id,
                router: Arc::clone(&ctx.router),
                registry: Arc::clone(&ctx.registry),
                wake_factory: Arc::clone(&ctx.wake_factory),
                notifier: ctx.notifier.clone(),
                running: Arc::clone(&ctx.running),
            },
            results,
        );
        match session {
            Ok(session) => current = Some(session),
            Err(e) => {
                ctx.notifier.error(&e);
                ctx.router.finish_session(ctx.wake_factory.create().ok());
            }
        }
    }

    if let Some(session) = current.take() {
        session.join();
    }
    debug!("processing thread exiting");
}
