//! Fan-out of lifecycle notifications to the optional hooks object and the
//! broadcast channel.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::ControllerHooks;
use crate::{
    command::{CommandArgs, DispatchListener},
    error::VoiceError,
    ipc::events::{ControllerEvent, ControllerStatus},
    router::SpliceReport,
};

#[derive(Clone)]
pub(crate) struct Notifier {
    hooks: Option<Arc<dyn ControllerHooks>>,
    events: broadcast::Sender<ControllerEvent>,
    status: Arc<Mutex<ControllerStatus>>,
    seq: Arc<AtomicU64>,
}

impl Notifier {
    pub(crate) fn new(events: broadcast::Sender<ControllerEvent>) -> Self {
        Self {
            hooks: None,
            events,
            status: Arc::new(Mutex::new(ControllerStatus::Idle)),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn set_hooks(&mut self, hooks: Arc<dyn ControllerHooks>) {
        self.hooks = Some(hooks);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn status(&self) -> ControllerStatus {
        *self.status.lock()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn set_status(&self, status: ControllerStatus, detail: Option<String>) {
        *self.status.lock() = status;
        self.emit(ControllerEvent::Status {
            seq: self.next_seq(),
            status,
            detail,
        });
    }

    /// Move from `from` to `to` only if `from` is still current. Returns
    /// whether the status changed.
    pub(crate) fn transition(&self, from: ControllerStatus, to: ControllerStatus) -> bool {
        let mut status = self.status.lock();
        if *status != from {
            return false;
        }
        *status = to;
        drop(status);
        self.emit(ControllerEvent::Status {
            seq: self.next_seq(),
            status: to,
            detail: None,
        });
        true
    }

    pub(crate) fn ready(&self) {
        info!("voice controller ready");
        if let Some(hooks) = &self.hooks {
            hooks.on_ready();
        }
        self.emit(ControllerEvent::Ready {
            seq: self.next_seq(),
        });
    }

    pub(crate) fn triggered(&self, report: SpliceReport) {
        if let Some(hooks) = &self.hooks {
            hooks.on_triggered();
        }
        self.emit(ControllerEvent::Triggered {
            seq: self.next_seq(),
            lag_samples: report.lag_samples,
            spliced_samples: report.spliced_samples,
        });
    }

    pub(crate) fn error(&self, err: &VoiceError) {
        warn!(error = %err, "voice controller error");
        if let Some(hooks) = &self.hooks {
            hooks.on_error(err);
        }
        self.emit(ControllerEvent::Error {
            seq: self.next_seq(),
            message: err.to_string(),
        });
    }
}

impl DispatchListener for Notifier {
    fn begin_command(&self, name: &str, args: &CommandArgs) {
        if let Some(hooks) = &self.hooks {
            hooks.on_begin_command(name, args);
        }
        self.emit(ControllerEvent::BeginCommand {
            seq: self.next_seq(),
            name: name.to_string(),
            args: args.clone(),
        });
    }

    fn finish_command(&self, name: &str, args: &CommandArgs) {
        if let Some(hooks) = &self.hooks {
            hooks.on_finish_command(name, args);
        }
        self.emit(ControllerEvent::FinishCommand {
            seq: self.next_seq(),
            name: name.to_string(),
            args: args.clone(),
        });
    }

    fn unknown_command(&self, text: &str) {
        info!(text, "unknown command");
        if let Some(hooks) = &self.hooks {
            hooks.on_unknown_command(text);
        }
        self.emit(ControllerEvent::UnknownCommand {
            seq: self.next_seq(),
            text: text.to_string(),
        });
    }

    fn command_failed(&self, name: &str, error: &anyhow::Error) {
        self.error(&VoiceError::CommandFailed {
            name: name.to_string(),
            message: format!("{error:#}"),
        });
    }
}
