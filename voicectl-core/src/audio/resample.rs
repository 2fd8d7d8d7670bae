//! Rate conversion from device/file rates to the router rate, ending in i16.
//!
//! Input arrives as normalised mono `f32`. When the rates already agree the
//! converter only quantises; otherwise a rubato `FastFixedIn` session runs on
//! fixed `block` sized input and the remainder waits for the next call.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::buffering::pcm::f32_to_pcm16;
use crate::error::{Result, VoiceError};

pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    block: usize,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `VoiceError::AudioStream` if rubato rejects the ratio or block size.
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self> {
        let block = block.max(1);
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| VoiceError::AudioStream(format!("resampler init: {e}")))?;
        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(from_rate, to_rate, block, "resampling input");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(block * 2),
            block,
            scratch,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Convert `samples`, appending finished PCM to `out`.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<i16>) {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend(samples.iter().map(|&s| f32_to_pcm16(s)));
            return;
        };

        self.pending.extend_from_slice(samples);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.block {
            let input = &self.pending[consumed..consumed + self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_, produced)) => {
                    out.extend(self.scratch[0][..produced].iter().map(|&s| f32_to_pcm16(s)))
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.block;
        }
        self.pending.drain(..consumed);
    }

    /// Push out the buffered tail, zero-padded to a full block.
    pub fn flush_into(&mut self, out: &mut Vec<i16>) {
        if self.resampler.is_none() || self.pending.is_empty() {
            return;
        }
        let missing = self.block - self.pending.len();
        let padding = vec![0f32; missing];
        self.process_into(&padding, out);
    }
}
