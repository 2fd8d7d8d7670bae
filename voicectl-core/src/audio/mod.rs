//! Audio input: the [`AudioSource`] seam plus device capture via cpal.
//!
//! # Real-time callback
//!
//! The cpal input callback runs on an OS audio thread. It only down-mixes into
//! a reusable buffer and pushes into the lock-free SPSC producer; it never
//! blocks and never performs I/O.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on Windows and macOS, so a capture must be opened
//! and dropped on the same thread. The controller opens its source inside the
//! router thread for that reason.

pub mod device;
pub mod resample;
pub mod source;

pub use device::{list_input_devices, InputDevice};
pub use source::MemorySource;
pub use source::WavSource;

#[cfg(feature = "audio-cpal")]
pub use source::CpalSource;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::Result;

/// Producer of mono 16-bit frames at a fixed rate.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    /// Replace the contents of `buf` with the next frame and return its
    /// length. `Ok(0)` means the stream has ended.
    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize>;
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        (**self).read_frame(buf)
    }
}

/// Live input stream feeding a [`CaptureProducer`](crate::buffering::CaptureProducer).
///
/// **Not `Send`** on most platforms. Create and drop it on one thread.
pub struct AudioCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    running: Arc<AtomicBool>,
    /// Native device rate (Hz).
    pub sample_rate: u32,
    pub device_name: String,
}

impl AudioCapture {
    /// Open `preferred` by exact name, else the default input, else the first
    /// input the host lists.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: crate::buffering::CaptureProducer,
        preferred: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::SampleFormat;
        use tracing::{info, warn};

        use crate::error::VoiceError;

        let host = cpal::default_host();
        let mut chosen = None;
        if let Some(wanted) = preferred {
            chosen = host
                .input_devices()
                .map_err(|e| VoiceError::AudioDevice(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            if chosen.is_none() {
                warn!(device = wanted, "preferred input device not found, falling back");
            }
        }
        let device = match chosen.or_else(|| host.default_input_device()) {
            Some(d) => d,
            None => host
                .input_devices()
                .map_err(|e| VoiceError::AudioDevice(e.to_string()))?
                .next()
                .ok_or(VoiceError::NoDefaultInputDevice)?,
        };
        let device_name = device.name().unwrap_or_default();

        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1);
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!(device = %device_name, sample_rate, channels, "opening input device");

        let running = Arc::new(AtomicBool::new(true));
        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_mono_stream(&device, &config, producer, &running, |s: f32| s)
            }
            SampleFormat::I16 => build_mono_stream(&device, &config, producer, &running, |s: i16| {
                s as f32 / 32_768.0
            }),
            SampleFormat::U8 => build_mono_stream(&device, &config, producer, &running, |s: u8| {
                (s as f32 - 128.0) / 128.0
            }),
            other => {
                return Err(VoiceError::AudioStream(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| VoiceError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            device_name,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: crate::buffering::CaptureProducer,
        _preferred: Option<&str>,
    ) -> Result<Self> {
        Err(crate::error::VoiceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Make the callback a no-op from its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build an input stream that averages interleaved channels into mono `f32`.
#[cfg(feature = "audio-cpal")]
fn build_mono_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: crate::buffering::CaptureProducer,
    running: &Arc<AtomicBool>,
    to_f32: F,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    F: Fn(T) -> f32 + Send + 'static,
{
    use cpal::traits::DeviceTrait;

    use crate::buffering::Producer;
    use crate::error::VoiceError;

    let channels = usize::from(config.channels);
    let running = Arc::clone(running);
    let mut mono: Vec<f32> = Vec::with_capacity(4_096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                mono.clear();
                mono.extend(data.chunks_exact(channels).map(|frame| {
                    frame.iter().map(|&s| to_f32(s)).sum::<f32>() / channels as f32
                }));
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    tracing::warn!(dropped = mono.len() - written, "capture ring full");
                }
            },
            |err| tracing::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| VoiceError::AudioStream(e.to_string()))
}
