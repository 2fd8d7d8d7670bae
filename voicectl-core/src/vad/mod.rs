//! Speech/silence classification of PCM frames.
//!
//! Both reference engines endpoint with it: [`EnergyWakeEngine`] to find the
//! end of a spoken burst, the HTTP cloud engine to decide when a command is
//! over.
//!
//! [`EnergyWakeEngine`]: crate::wake::EnergyWakeEngine

pub mod calibrate;
pub mod energy;

pub use calibrate::{AdaptiveThreshold, AmbientCalibrator, NoiseFloor};
pub use energy::EnergyVad;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Frame classifier. May carry state between frames, e.g. a hangover count.
pub trait VoiceActivityDetector: Send + 'static {
    fn classify(&mut self, frame: &[i16]) -> VadDecision;
}
