//! Gaussian noise source with optional autocorrelation filtering
//!
//! Drives the temporal-distortion jitter: white Gaussian samples, scaled by
//! a standard deviation in samples, optionally low-pass filtered so
//! consecutive offsets stay correlated.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use au_core::Sample;

use crate::biquad::{BiquadFilter, FilterType};

pub const DEFAULT_AUTOCORRELATION_CUTOFF_HZ: f64 = 500.0;
pub const DEFAULT_AUTOCORRELATION_Q: f64 = 0.707;

#[derive(Debug)]
pub struct NoiseGenerator {
    rng: ChaCha8Rng,
    deviation: f32,
    filter: Option<BiquadFilter>,
    sample_rate: f64,
    spare: Option<f32>,
}

impl NoiseGenerator {
    pub fn new(deviation: f32) -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            deviation,
            filter: None,
            sample_rate: 44_100.0,
            spare: None,
        }
    }

    /// Deterministic generator for reproducible tests.
    pub fn with_seed(deviation: f32, seed: u64) -> Self {
        let mut g = Self::new(deviation);
        g.rng = ChaCha8Rng::seed_from_u64(seed);
        g
    }

    pub fn set_deviation(&mut self, deviation: f32) {
        self.deviation = deviation;
    }

    pub fn deviation(&self) -> f32 {
        self.deviation
    }

    /// Enable the band-limiting filter on the noise sequence.
    pub fn enable_autocorrelation_filter(&mut self, sample_rate: f64, cutoff: f64, q: f64) {
        let mut f = BiquadFilter::new();
        f.setup(FilterType::Lowpass, cutoff, q, sample_rate);
        self.filter = Some(f);
        self.sample_rate = sample_rate;
    }

    pub fn set_autocorrelation_cutoff(&mut self, cutoff: f64) {
        if let Some(f) = &mut self.filter {
            f.setup(
                FilterType::Lowpass,
                cutoff,
                DEFAULT_AUTOCORRELATION_Q,
                self.sample_rate,
            );
        }
    }

    /// Standard normal via Box-Muller; the second value is cached.
    fn standard_normal(&mut self) -> f32 {
        if let Some(v) = self.spare.take() {
            return v;
        }
        let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.gen_range(0.0..1.0);
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = std::f32::consts::TAU * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }

    /// Fill a block with scaled (and optionally band-limited) noise.
    pub fn process(&mut self, output: &mut [Sample]) {
        for s in output.iter_mut() {
            *s = self.standard_normal() * self.deviation;
        }
        if let Some(f) = &mut self.filter {
            f.process(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deviation_scales_noise() {
        let mut g = NoiseGenerator::with_seed(10.0, 7);
        let mut block = vec![0.0f32; 65_536];
        g.process(&mut block);
        let mean = block.iter().sum::<f32>() / block.len() as f32;
        let var = block.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / block.len() as f32;
        let std = var.sqrt();
        assert!((std - 10.0).abs() < 0.5, "std {std}");
        assert!(mean.abs() < 0.5);
    }

    #[test]
    fn test_zero_deviation_is_silent() {
        let mut g = NoiseGenerator::with_seed(0.0, 1);
        let mut block = vec![1.0f32; 64];
        g.process(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_filter_increases_correlation() {
        let mut white = NoiseGenerator::with_seed(1.0, 42);
        let mut filtered = NoiseGenerator::with_seed(1.0, 42);
        filtered.enable_autocorrelation_filter(44_100.0, 500.0, 0.707);

        let mut a = vec![0.0f32; 32_768];
        let mut b = vec![0.0f32; 32_768];
        white.process(&mut a);
        filtered.process(&mut b);

        let corr = |x: &[f32]| {
            let num: f32 = x.windows(2).map(|w| w[0] * w[1]).sum();
            let den: f32 = x.iter().map(|s| s * s).sum();
            num / den
        };
        assert!(corr(&b) > corr(&a) + 0.3);
    }
}
