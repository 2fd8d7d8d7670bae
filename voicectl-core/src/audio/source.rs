//! Concrete [`AudioSource`]s: microphone, WAV replay and in-memory samples.

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use super::{resample::RateConverter, AudioSource};
use crate::error::{Result, VoiceError};

/// Samples fed to rubato per call when converting whole files.
const FILE_RESAMPLE_BLOCK: usize = 1_024;

/// Fixed frames from a sample vector, then end of stream.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Vec<i16>,
    pos: usize,
    frame_size: usize,
    sample_rate: u32,
}

impl MemorySource {
    pub fn new(samples: Vec<i16>, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            samples,
            pos: 0,
            frame_size: frame_size.max(1),
            sample_rate,
        }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl AudioSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        let end = (self.pos + self.frame_size).min(self.samples.len());
        buf.clear();
        buf.extend_from_slice(&self.samples[self.pos..end]);
        self.pos = end;
        Ok(buf.len())
    }
}

/// Replays a WAV file at the router rate. Optionally paced to real time.
#[derive(Debug)]
pub struct WavSource {
    inner: MemorySource,
    realtime: bool,
    started: Option<Instant>,
    delivered: u64,
}

impl WavSource {
    /// Decode `path`, down-mix to mono and resample to `target_rate`.
    pub fn open(path: &Path, target_rate: u32, frame_size: usize) -> Result<Self> {
        let (mono, file_rate) = read_wav_mono(path)?;
        let mut converter = RateConverter::new(file_rate, target_rate, FILE_RESAMPLE_BLOCK)?;
        let mut samples = Vec::with_capacity(mono.len());
        converter.process_into(&mono, &mut samples);
        converter.flush_into(&mut samples);

        info!(
            path = %path.display(),
            file_rate,
            target_rate,
            seconds = samples.len() as f64 / target_rate.max(1) as f64,
            "replaying wav file"
        );
        Ok(Self {
            inner: MemorySource::new(samples, target_rate, frame_size),
            realtime: false,
            started: None,
            delivered: 0,
        })
    }

    /// Sleep between frames so audio arrives no faster than it would live.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl AudioSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        if self.realtime {
            let started = *self.started.get_or_insert_with(Instant::now);
            let rate = f64::from(self.sample_rate().max(1));
            let due = Duration::from_secs_f64(self.delivered as f64 / rate);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
        let n = self.inner.read_frame(buf)?;
        self.delivered += n as u64;
        Ok(n)
    }
}

fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let open_err = |e: hound::Error| VoiceError::AudioStream(format!("{}: {e}", path.display()));
    let mut reader = hound::WavReader::open(path).map_err(open_err)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(open_err)?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(open_err)?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Microphone input resampled to the router rate.
///
/// Owns an [`AudioCapture`](super::AudioCapture), so it is not `Send`; open it
/// on the thread that reads from it.
#[cfg(feature = "audio-cpal")]
pub struct CpalSource {
    capture: super::AudioCapture,
    consumer: crate::buffering::CaptureConsumer,
    converter: RateConverter,
    target_rate: u32,
    frame_size: usize,
    raw: Vec<f32>,
    pending: Vec<i16>,
    stall_timeout: Duration,
}

#[cfg(feature = "audio-cpal")]
impl CpalSource {
    pub fn open(
        preferred_device: Option<&str>,
        target_rate: u32,
        frame_size: usize,
    ) -> Result<Self> {
        let (producer, consumer) = crate::buffering::create_capture_ring();
        let capture = super::AudioCapture::open(producer, preferred_device)?;
        let converter = RateConverter::new(capture.sample_rate, target_rate, 960)?;
        Ok(Self {
            capture,
            consumer,
            converter,
            target_rate,
            frame_size: frame_size.max(1),
            raw: vec![0f32; 4_096],
            pending: Vec::with_capacity(frame_size * 2),
            stall_timeout: Duration::from_secs(2),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.capture.device_name
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn read_frame(&mut self, buf: &mut Vec<i16>) -> Result<usize> {
        use crate::buffering::Consumer;

        let mut idle_since = Instant::now();
        while self.pending.len() < self.frame_size {
            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                if idle_since.elapsed() > self.stall_timeout {
                    return Err(VoiceError::AudioStream(
                        "input device stopped delivering samples".into(),
                    ));
                }
                thread::sleep(Duration::from_millis(5));
                continue;
            }
            idle_since = Instant::now();
            self.converter.process_into(&self.raw[..n], &mut self.pending);
        }

        buf.clear();
        buf.extend(self.pending.drain(..self.frame_size));
        Ok(buf.len())
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for CpalSource {
    fn drop(&mut self) {
        debug!(device = %self.capture.device_name, "closing input device");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_ends_with_a_zero_length_read() {
        let mut source = MemorySource::new((0..10).collect(), 16_000, 4);
        let mut buf = Vec::new();
        let mut sizes = Vec::new();
        loop {
            let n = source.read_frame(&mut buf).unwrap();
            sizes.push(n);
            if n == 0 {
                break;
            }
        }
        assert_eq!(sizes, vec![4, 4, 2, 0]);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn wav_source_downmixes_stereo() {
        let path = std::env::temp_dir().join(format!("voicectl-wav-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        {
            let mut writer = hound::WavWriter::create(&path, spec).unwrap();
            for _ in 0..800 {
                writer.write_sample(8_000i16).unwrap();
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let mut source = WavSource::open(&path, 16_000, 400).unwrap();
        let _ = std::fs::remove_file(&path);
        let mut buf = Vec::new();
        assert_eq!(source.read_frame(&mut buf).unwrap(), 400);
        // (8000/32768 + 0) / 2 → 4000 after requantisation, ±1 for rounding.
        assert!(buf.iter().all(|&s| (s - 4_000).abs() <= 1), "{:?}", &buf[..4]);
        assert_eq!(source.read_frame(&mut buf).unwrap(), 400);
        assert_eq!(source.read_frame(&mut buf).unwrap(), 0);
    }

    #[test]
    fn missing_file_is_an_audio_stream_error() {
        let err = WavSource::open(Path::new("/nonexistent/voicectl.wav"), 16_000, 400)
            .unwrap_err();
        assert!(matches!(err, VoiceError::AudioStream(_)));
    }
}
