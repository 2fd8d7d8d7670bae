//! `CommandSession`: one trigger's worth of work on its own thread.
//!
//! The session waits for the cloud engine's terminal event, dispatches the
//! recognised text (following chains), then hands the router a fresh wake
//! engine and releases the single-session slot. There is no timeout: a cloud
//! engine that never reports keeps the controller in Recording.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::notify::Notifier;
use crate::{
    cloud::SessionEvent,
    command::CommandRegistry,
    error::{Result, VoiceError},
    ipc::events::ControllerStatus,
    router::AudioRouter,
    wake::WakeEngineFactory,
};

pub(crate) struct SessionContext {
    pub id: u64,
    pub router: Arc<AudioRouter>,
    pub registry: Arc<CommandRegistry>,
    pub wake_factory: Arc<dyn WakeEngineFactory>,
    pub notifier: Notifier,
    pub running: Arc<AtomicBool>,
}

/// Handle to an in-flight command session.
pub struct CommandSession {
    id: u64,
    handle: JoinHandle<()>,
}

impl CommandSession {
    pub(crate) fn start(ctx: SessionContext, events: Receiver<SessionEvent>) -> Result<Self> {
        let id = ctx.id;
        let handle = thread::Builder::new()
            .name(format!("voicectl-session-{id}"))
            .spawn(move || run(ctx, events))?;
        Ok(Self { id, handle })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the session has returned the router to waiting.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!(session = self.id, "command session thread panicked");
        }
    }
}

fn run(ctx: SessionContext, events: Receiver<SessionEvent>) {
    match events.recv() {
        Ok(SessionEvent::Recognized(text)) => {
            info!(session = ctx.id, text = %text, "command recognized");
            let report = ctx.registry.perform_all_commands(&text, &ctx.notifier);
            debug!(session = ctx.id, handled = report.handled.len(), "dispatch finished");
        }
        Ok(SessionEvent::Canceled(reason)) => {
            ctx.notifier.error(&VoiceError::CloudSession(reason));
        }
        Ok(SessionEvent::Stopped) => {
            debug!(session = ctx.id, "cloud session stopped without a result");
        }
        Err(_) => {
            ctx.notifier.error(&VoiceError::CloudSession(
                "session ended without a terminal event".into(),
            ));
        }
    }

    let fresh = match ctx.wake_factory.create() {
        Ok(engine) => Some(engine),
        Err(e) => {
            ctx.notifier.error(&e);
            None
        }
    };
    ctx.router.finish_session(fresh);

    // A stop that raced the session has already published its own status.
    if ctx.running.load(Ordering::SeqCst) {
        ctx.notifier
            .transition(ControllerStatus::Recording, ControllerStatus::Listening);
    }
}
