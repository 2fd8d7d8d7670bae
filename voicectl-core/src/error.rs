//! Error types for the core crate.

use thiserror::Error;

use crate::command::pattern::PatternError;

/// All errors produced by voicectl-core.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("invalid command pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("synonyms for '{word}' registered after commands were compiled")]
    SynonymsFrozen { word: String },

    #[error("wake word engine error: {0}")]
    WakeEngine(String),

    #[error("cloud session error: {0}")]
    CloudSession(String),

    #[error("command '{name}' failed: {message}")]
    CommandFailed { name: String, message: String },

    #[error("controller is already running")]
    AlreadyRunning,

    #[error("controller is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceError>;
