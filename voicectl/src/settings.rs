//! Persistent CLI settings (JSON file in the user data directory).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use voicectl_core::{
    wake::EnergyWakeConfig, AdaptiveThreshold, Calibration, ClockMode, ControllerConfig,
    HttpCloudConfig, NoiseFloor, RouterConfig,
};

pub const API_KEY_ENV: &str = "VOICECTL_API_KEY";

const DEFAULT_WAKE_WORD: &str = "computer";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_MODEL: &str = "gpt-4o-mini-transcribe";
const MAX_COMMANDS: usize = 256;

/// What to do when a command pattern matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// Log the command and its arguments.
    Log,
    /// Run a program. `{name}` in any argument is replaced by the value of
    /// `$name`, or by nothing when the variable did not match.
    Exec {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub pattern: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub wake_word: String,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub ring_secs: f32,
    pub splice_cap_secs: f32,
    pub clock: ClockMode,
    pub preferred_input_device: Option<String>,
    pub wake_threshold: f32,
    pub wake_min_secs: f64,
    pub wake_max_secs: f64,
    pub cloud_endpoint: String,
    pub cloud_model: String,
    pub cloud_language: Option<String>,
    pub api_key: Option<String>,
    pub end_silence_secs: f32,
    pub max_command_secs: f32,
    pub strip_punctuation: bool,
    /// Fold accented transcripts to ASCII before matching.
    pub transliterate: bool,
    /// Seconds of room noise measured before listening; 0 disables.
    pub calibration_secs: f32,
    /// Voiced frames must reach this multiple of the measured noise RMS.
    pub noise_factor: f32,
    pub synonyms: BTreeMap<String, Vec<String>>,
    pub commands: Vec<CommandSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wake_word: DEFAULT_WAKE_WORD.into(),
            sample_rate: 16_000,
            frame_ms: 100,
            ring_secs: 2.0,
            splice_cap_secs: 1.0,
            clock: ClockMode::Samples,
            preferred_input_device: None,
            wake_threshold: 0.02,
            wake_min_secs: 0.25,
            wake_max_secs: 1.5,
            cloud_endpoint: DEFAULT_ENDPOINT.into(),
            cloud_model: DEFAULT_MODEL.into(),
            cloud_language: None,
            api_key: None,
            end_silence_secs: 0.8,
            max_command_secs: 10.0,
            strip_punctuation: true,
            transliterate: true,
            calibration_secs: 0.5,
            noise_factor: 3.0,
            synonyms: BTreeMap::new(),
            commands: vec![CommandSpec {
                pattern: "say $text...".into(),
                action: Action::Log,
            }],
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.wake_word = non_empty(&self.wake_word.to_lowercase(), DEFAULT_WAKE_WORD);
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.frame_ms = self.frame_ms.clamp(10, 500);
        self.ring_secs = self.ring_secs.clamp(0.5, 30.0);
        self.splice_cap_secs = self.splice_cap_secs.clamp(0.1, self.ring_secs);
        self.wake_threshold = self.wake_threshold.clamp(0.001, 0.5);
        self.wake_min_secs = self.wake_min_secs.clamp(0.05, 5.0);
        self.wake_max_secs = self.wake_max_secs.clamp(self.wake_min_secs, 10.0);
        self.cloud_endpoint = non_empty(&self.cloud_endpoint, DEFAULT_ENDPOINT);
        self.cloud_model = non_empty(&self.cloud_model, DEFAULT_MODEL);
        self.cloud_language = trimmed(self.cloud_language.take());
        self.api_key = trimmed(self.api_key.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.end_silence_secs = self.end_silence_secs.clamp(0.2, 5.0);
        self.max_command_secs = self.max_command_secs.clamp(1.0, 60.0);
        self.calibration_secs = self.calibration_secs.clamp(0.0, 5.0);
        self.noise_factor = self.noise_factor.clamp(1.0, 20.0);

        let synonyms = std::mem::take(&mut self.synonyms);
        for (word, alternatives) in synonyms {
            let word = word.trim().to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut kept: Vec<String> = Vec::new();
            for alt in alternatives {
                let alt = alt.trim().to_lowercase();
                if !alt.is_empty() && alt != word && !kept.contains(&alt) {
                    kept.push(alt);
                }
            }
            if !kept.is_empty() {
                self.synonyms.insert(word, kept);
            }
        }

        self.commands.retain(|c| !c.pattern.trim().is_empty());
        self.commands.truncate(MAX_COMMANDS);
    }

    /// Environment wins over the file for the API key.
    pub fn apply_api_key_override(&mut self, env_value: Option<String>) {
        if let Some(key) = trimmed(env_value) {
            self.api_key = Some(key);
        }
    }

    pub fn frame_size(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1_000
    }

    /// Threshold adaptation tied to `floor`, or `None` with calibration off.
    pub fn adaptive_threshold(&self, floor: &NoiseFloor) -> Option<AdaptiveThreshold> {
        (self.calibration_secs > 0.0).then(|| AdaptiveThreshold {
            floor: floor.clone(),
            factor: self.noise_factor,
        })
    }

    pub fn controller_config(&self, floor: &NoiseFloor) -> ControllerConfig {
        ControllerConfig {
            router: RouterConfig {
                sample_rate: self.sample_rate,
                ring_secs: self.ring_secs,
                splice_cap_secs: self.splice_cap_secs,
                wake_word: self.wake_word.clone(),
                clock: self.clock,
            },
            frame_size: self.frame_size(),
            calibration: (self.calibration_secs > 0.0).then(|| Calibration {
                window_secs: self.calibration_secs,
                floor: floor.clone(),
            }),
        }
    }

    pub fn wake_config(&self, floor: &NoiseFloor) -> EnergyWakeConfig {
        EnergyWakeConfig {
            keyword: self.wake_word.clone(),
            sample_rate: self.sample_rate,
            threshold: self.wake_threshold,
            adaptive: self.adaptive_threshold(floor),
            min_burst_secs: self.wake_min_secs,
            max_burst_secs: self.wake_max_secs,
            ..EnergyWakeConfig::default()
        }
    }

    pub fn cloud_config(&self, floor: &NoiseFloor) -> HttpCloudConfig {
        HttpCloudConfig {
            endpoint: self.cloud_endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.cloud_model.clone(),
            language: self.cloud_language.clone(),
            sample_rate: self.sample_rate,
            adaptive: self.adaptive_threshold(floor),
            end_silence_secs: self.end_silence_secs,
            max_command_secs: self.max_command_secs,
            ..HttpCloudConfig::default()
        }
    }
}

fn non_empty(raw: &str, fallback: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        fallback.into()
    } else {
        value.into()
    }
}

fn trimmed(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicectl")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voicectl")
            .join("settings.json")
    }
}

/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<Settings>(&raw)
            .with_context(|| format!("parsing settings file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            Settings::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading settings file {}", path.display()))
        }
    };
    settings.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    settings.normalize();
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
