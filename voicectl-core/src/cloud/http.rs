//! `HttpCloudEngine`: batch transcription over an OpenAI-compatible HTTP API.
//!
//! The push stream only queues frames. A per-session worker thread endpoints
//! the audio with [`EnergyVad`], encodes what it heard as 16-bit WAV and posts
//! it as `multipart/form-data` to `/v1/audio/transcriptions`.
//!
//! ```text
//! router ──write()──► channel ──► worker: Endpointer ─► WAV ─► POST ─► SessionEvents
//! ```

use std::{io::Cursor, thread, time::Duration};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use reqwest::blocking::multipart;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{CloudSpeechEngine, PushStream, SessionEvents};
use crate::error::{Result, VoiceError};
use crate::vad::{AdaptiveThreshold, EnergyVad, VoiceActivityDetector};

#[derive(Debug, Clone)]
pub struct HttpCloudConfig {
    /// Full URL of the transcription endpoint.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// ISO-639-1 hint passed to the service.
    pub language: Option<String>,
    pub sample_rate: u32,
    pub vad_threshold: f32,
    /// Raises `vad_threshold` to a multiple of the calibrated room noise.
    pub adaptive: Option<AdaptiveThreshold>,
    /// Trailing silence that ends a command.
    pub end_silence_secs: f32,
    /// Hard cap on command length.
    pub max_command_secs: f32,
    /// Give up when nothing voiced arrives within this window.
    pub no_speech_timeout_secs: f32,
    pub request_timeout_secs: u64,
}

impl Default for HttpCloudConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".into(),
            api_key: None,
            model: "gpt-4o-mini-transcribe".into(),
            language: None,
            sample_rate: 16_000,
            vad_threshold: 0.02,
            adaptive: None,
            end_silence_secs: 0.8,
            max_command_secs: 10.0,
            no_speech_timeout_secs: 4.0,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpCloudEngine {
    config: HttpCloudConfig,
}

impl HttpCloudEngine {
    pub fn new(config: HttpCloudConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HttpCloudConfig {
        &self.config
    }
}

impl CloudSpeechEngine for HttpCloudEngine {
    fn start_session(&self, events: SessionEvents) -> Result<Box<dyn PushStream>> {
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<i16>>();
        let config = self.config.clone();
        thread::Builder::new()
            .name("voicectl-cloud".into())
            .spawn(move || run_session(config, rx, events))
            .map_err(|e| VoiceError::CloudSession(format!("spawn session worker: {e}")))?;
        Ok(Box::new(QueuedStream { tx: Some(tx) }))
    }
}

struct QueuedStream {
    tx: Option<Sender<Vec<i16>>>,
}

impl PushStream for QueuedStream {
    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(tx) = &self.tx {
            // The worker stops reading once it has endpointed; late frames are dropped.
            let _ = tx.send(samples.to_vec());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Why the worker stopped collecting audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    SpeechEnded,
    MaxDuration,
    NoSpeech,
}

/// Frame-by-frame command endpointing on top of the energy VAD.
pub(crate) struct Endpointer {
    vad: EnergyVad,
    heard_speech: bool,
    total: usize,
    trailing_silence: usize,
    end_silence: usize,
    max_total: usize,
    no_speech: usize,
}

impl Endpointer {
    pub(crate) fn new(config: &HttpCloudConfig) -> Self {
        let rate = config.sample_rate as f32;
        Self {
            vad: EnergyVad::new(config.vad_threshold, 0)
                .with_adaptive(config.adaptive.clone()),
            heard_speech: false,
            total: 0,
            trailing_silence: 0,
            end_silence: (config.end_silence_secs * rate) as usize,
            max_total: (config.max_command_secs * rate) as usize,
            no_speech: (config.no_speech_timeout_secs * rate) as usize,
        }
    }

    pub(crate) fn push(&mut self, frame: &[i16]) -> Option<Endpoint> {
        self.total += frame.len();
        if self.vad.classify(frame).is_speech() {
            self.heard_speech = true;
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += frame.len();
        }

        if self.total >= self.max_total {
            Some(if self.heard_speech {
                Endpoint::MaxDuration
            } else {
                Endpoint::NoSpeech
            })
        } else if self.heard_speech && self.trailing_silence >= self.end_silence {
            Some(Endpoint::SpeechEnded)
        } else if !self.heard_speech && self.total >= self.no_speech {
            Some(Endpoint::NoSpeech)
        } else {
            None
        }
    }

    pub(crate) fn heard_speech(&self) -> bool {
        self.heard_speech
    }
}

fn run_session(config: HttpCloudConfig, rx: Receiver<Vec<i16>>, events: SessionEvents) {
    let mut endpointer = Endpointer::new(&config);
    let mut audio: Vec<i16> = Vec::new();
    let idle_limit = Duration::from_secs_f32(config.no_speech_timeout_secs.max(0.5));

    let endpoint = loop {
        match rx.recv_timeout(idle_limit) {
            Ok(frame) => {
                audio.extend_from_slice(&frame);
                if let Some(endpoint) = endpointer.push(&frame) {
                    break endpoint;
                }
            }
            // Stream closed or starved: send what we have, if it holds speech.
            Err(RecvTimeoutError::Disconnected) | Err(RecvTimeoutError::Timeout) => {
                if endpointer.heard_speech() {
                    break Endpoint::SpeechEnded;
                }
                break Endpoint::NoSpeech;
            }
        }
    };
    drop(rx);

    debug!(?endpoint, samples = audio.len(), "cloud session endpointed");
    if endpoint == Endpoint::NoSpeech {
        events.canceled("no speech detected");
        return;
    }

    match transcribe(&config, &audio) {
        Ok(text) if text.is_empty() => events.canceled("service returned empty transcript"),
        Ok(text) => {
            info!(chars = text.len(), "cloud transcription received");
            events.recognized(text);
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "cloud transcription failed");
            events.canceled(format!("{e:#}"));
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn transcribe(config: &HttpCloudConfig, samples: &[i16]) -> anyhow::Result<String> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .context("no API key configured for the cloud engine")?;

    let wav = encode_wav(samples, config.sample_rate)?;
    let file_part = multipart::Part::bytes(wav)
        .file_name("command.wav")
        .mime_str("audio/wav")?;
    let mut form = multipart::Form::new()
        .text("model", config.model.clone())
        .text("response_format", "json")
        .part("file", file_part);
    if let Some(lang) = &config.language {
        form = form.text("language", lang.clone());
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("building HTTP client")?;

    let response = client
        .post(&config.endpoint)
        .bearer_auth(api_key)
        .multipart(form)
        .send()
        .with_context(|| format!("POST {}", config.endpoint))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("transcription request returned {status}");
    }

    let payload: TranscriptionResponse = response
        .json()
        .context("parsing transcription response")?;
    Ok(payload.text.trim().to_string())
}

/// Mono 16-bit WAV held in memory.
pub(crate) fn encode_wav(samples: &[i16], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HttpCloudConfig {
        HttpCloudConfig {
            end_silence_secs: 0.3,
            max_command_secs: 2.0,
            no_speech_timeout_secs: 1.0,
            ..HttpCloudConfig::default()
        }
    }

    fn push_n(ep: &mut Endpointer, amplitude: i16, frames: usize) -> Option<Endpoint> {
        let frame = vec![amplitude; 1_600];
        (0..frames).find_map(|_| ep.push(&frame))
    }

    #[test]
    fn trailing_silence_ends_the_command() {
        let mut ep = Endpointer::new(&config());
        assert_eq!(push_n(&mut ep, 6_000, 5), None);
        assert_eq!(push_n(&mut ep, 0, 2), None);
        assert_eq!(push_n(&mut ep, 0, 1), Some(Endpoint::SpeechEnded));
    }

    #[test]
    fn silence_only_session_times_out() {
        let mut ep = Endpointer::new(&config());
        assert_eq!(push_n(&mut ep, 0, 9), None);
        assert_eq!(push_n(&mut ep, 0, 1), Some(Endpoint::NoSpeech));
    }

    #[test]
    fn continuous_speech_hits_the_cap() {
        let mut ep = Endpointer::new(&config());
        assert_eq!(push_n(&mut ep, 6_000, 19), None);
        assert_eq!(push_n(&mut ep, 6_000, 1), Some(Endpoint::MaxDuration));
    }

    #[test]
    fn calibrated_noise_is_not_mistaken_for_speech() {
        let floor = crate::vad::NoiseFloor::new();
        floor.set(0.03);
        let mut ep = Endpointer::new(&HttpCloudConfig {
            adaptive: Some(AdaptiveThreshold { floor, factor: 3.0 }),
            ..config()
        });
        // 0.03 RMS hum would pass the bare 0.02 gate.
        assert_eq!(push_n(&mut ep, 1_000, 9), None);
        assert!(!ep.heard_speech());
        assert_eq!(push_n(&mut ep, 1_000, 1), Some(Endpoint::NoSpeech));
    }

    #[test]
    fn wav_encoding_is_readable_by_hound() {
        let bytes = encode_wav(&[0, 1_000, -1_000], 16_000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 3);
    }

    #[test]
    fn missing_api_key_is_reported_before_any_request() {
        let err = transcribe(&config(), &[0; 160]).unwrap_err();
        assert!(err.to_string().contains("no API key"));
    }
}
