//! Buffer helpers shared by the block-processing paths
//!
//! Mono blocks are plain `[Sample]` slices; stereo blocks interleave L/R.

use crate::Sample;

/// Multiply a block by a constant gain.
pub fn apply_gain(buffer: &mut [Sample], gain: Sample) {
    for s in buffer.iter_mut() {
        *s *= gain;
    }
}

/// Smoothing coefficient for a given attack time: the gain reaches 99% of a
/// step change after `attack_ms` milliseconds.
pub fn exponential_alpha(attack_ms: f32, sample_rate: u32) -> f32 {
    let denominator = attack_ms * sample_rate as f32;
    if denominator > 1e-3 {
        1.0 - (1000.0 * 0.01f32.ln() / denominator).exp()
    } else {
        1.0
    }
}

/// Multiply a block by a gain that approaches `target` with a one-pole
/// exponential, continuing from `*state`. Prevents zipper noise on
/// distance-attenuation changes.
pub fn apply_gain_exponentially(
    buffer: &mut [Sample],
    state: &mut f32,
    target: f32,
    attack_ms: f32,
    sample_rate: u32,
) {
    let alpha = exponential_alpha(attack_ms, sample_rate);
    let mut gain = *state;
    for s in buffer.iter_mut() {
        gain = (target - gain) * alpha + gain;
        *s *= gain;
    }
    *state = gain;
}

/// Interleave two mono blocks into a stereo block (`out` must be 2x as long).
pub fn interlace(left: &[Sample], right: &[Sample], out: &mut [Sample]) {
    debug_assert_eq!(out.len(), left.len() + right.len());
    for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        out[2 * i] = *l;
        out[2 * i + 1] = *r;
    }
}

/// Mean power of a block.
pub fn power(buffer: &[Sample]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32
}

/// Autocorrelation at an integer shift, normalized by length.
pub fn autocorrelation(buffer: &[Sample], shift: usize) -> f32 {
    if buffer.len() <= shift {
        return 0.0;
    }
    let n = buffer.len() - shift;
    buffer[..n]
        .iter()
        .zip(&buffer[shift..])
        .map(|(a, b)| a * b)
        .sum::<f32>()
        / buffer.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exponential_gain_converges() {
        let mut block = vec![1.0f32; 44_100];
        let mut state = 0.0;
        apply_gain_exponentially(&mut block, &mut state, 0.5, 120.0, 44_100);
        // After a full second with a 120 ms attack the gain has converged.
        assert_relative_eq!(*block.last().unwrap(), 0.5, epsilon = 1e-4);
        assert_relative_eq!(state, 0.5, epsilon = 1e-4);
        // The first sample moved only a tiny step from zero.
        assert!(block[0] < 0.01);
    }

    #[test]
    fn test_interlace() {
        let mut out = vec![0.0; 6];
        interlace(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0], &mut out);
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_power_and_autocorrelation() {
        let dc = vec![0.5f32; 8];
        assert_relative_eq!(power(&dc), 0.25, epsilon = 1e-6);
        assert_relative_eq!(autocorrelation(&dc, 1), 0.25 * 7.0 / 8.0, epsilon = 1e-6);
    }
}
