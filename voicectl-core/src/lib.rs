//! # voicectl-core
//!
//! Wake-word gated voice command engine.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► AudioRouter ─┬─ Waiting:   RingBuffer + WakeWordEngine ─► Detection
//!                             │                                               │
//!                             │            processing thread: lag splice ◄────┘
//!                             │                        │
//!                             └─ Recording: PushStream ◄┘ ─► CloudSpeechEngine
//!                                                                  │ SessionEvent
//!                                         CommandSession ◄─────────┘
//!                                               │
//!                                CommandRegistry::perform_all_commands
//! ```
//!
//! The router never blocks on recognition. Cloud sessions, dispatch and
//! wake-engine re-arming all happen off the audio path.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod cloud;
pub mod command;
pub mod controller;
pub mod error;
pub mod ipc;
pub mod router;
pub mod vad;
pub mod wake;

// Convenience re-exports for downstream crates
pub use audio::{AudioSource, MemorySource, WavSource};
pub use buffering::RingBuffer;
pub use cloud::{CloudSpeechEngine, PushStream, SessionEvent, SessionEvents};
pub use command::{
    CommandArgs, CommandHandler, CommandPattern, CommandRegistry, DispatchListener,
    DispatchReport, PatternError,
};
pub use controller::{
    Calibration, CommandSession, ControllerConfig, ControllerHooks, VoiceController,
};
pub use error::{Result, VoiceError};
pub use ipc::events::{ControllerEvent, ControllerStatus};
pub use router::{ClockMode, Mode, RouterConfig};
pub use vad::{AdaptiveThreshold, NoiseFloor};
pub use wake::{WakeEngineFactory, WakeResult, WakeWordEngine, WordTiming};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalSource;

#[cfg(feature = "cloud-http")]
pub use cloud::{HttpCloudConfig, HttpCloudEngine};
