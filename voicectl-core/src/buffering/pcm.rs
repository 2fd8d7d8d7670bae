//! 16-bit PCM helpers shared by capture, VAD and the reference engines.

/// RMS of 16-bit PCM, normalised so full scale is 1.0. Empty input is 0.
pub fn pcm16_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let f = f64::from(s) / 32768.0;
            f * f
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Normalised `f32` to 16-bit PCM, clipping out-of-range input.
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<i16> = (0..256)
            .map(|i| if i % 2 == 0 { 16_384 } else { -16_384 })
            .collect();
        assert_relative_eq!(pcm16_rms(&samples), 0.5, epsilon = 1e-5);
        assert_eq!(pcm16_rms(&[]), 0.0);
    }

    #[test]
    fn f32_conversion_clips() {
        assert_eq!(f32_to_pcm16(2.0), i16::MAX);
        assert_eq!(f32_to_pcm16(-2.0), -i16::MAX);
        assert_eq!(f32_to_pcm16(0.0), 0);
    }
}
