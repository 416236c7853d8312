//! Temporal distortion (jitter) simulator
//!
//! Models degraded neural synchronization: the band below a cutoff is read
//! through a delay buffer whose tap wanders per sample with band-limited
//! Gaussian noise, while the band above is delayed by the maximum offset so
//! both paths stay time-aligned. The bypass path carries identical filters
//! and delays, so toggling one ear never jumps in time.

use au_core::{buffer, Ear, EarPair, Sample};
use au_dsp::noise::{DEFAULT_AUTOCORRELATION_CUTOFF_HZ, DEFAULT_AUTOCORRELATION_Q};
use au_dsp::{DelayLine, FilterChain, FilterType, NoiseGenerator};

pub const DEFAULT_BAND_UPPER_LIMIT_HZ: f64 = 500.0;

/// Shift used for the one-lag autocorrelation metric.
const AUTOCORRELATION_SHIFT_MS: f32 = 1.0;

struct EarPath {
    pre_lpf: FilterChain,
    pre_hpf: FilterChain,
    post_lpf: FilterChain,
    post_hpf: FilterChain,
    bypass_pre_lpf: FilterChain,
    bypass_pre_hpf: FilterChain,
    bypass_post_lpf: FilterChain,
    bypass_post_hpf: FilterChain,
    jitter_delay: DelayLine,
    high_delay: DelayLine,
    bypass_low_delay: DelayLine,
    bypass_high_delay: DelayLine,
}

impl EarPath {
    fn new(sample_rate: f64, cutoff: f64, max_offset: usize) -> Self {
        let lpf = || FilterChain::butterworth_order4(FilterType::Lowpass, cutoff, sample_rate);
        let hpf = || FilterChain::butterworth_order4(FilterType::Highpass, cutoff, sample_rate);
        Self {
            pre_lpf: lpf(),
            pre_hpf: hpf(),
            post_lpf: lpf(),
            post_hpf: hpf(),
            bypass_pre_lpf: lpf(),
            bypass_pre_hpf: hpf(),
            bypass_post_lpf: lpf(),
            bypass_post_hpf: hpf(),
            jitter_delay: DelayLine::new(2 * max_offset),
            high_delay: DelayLine::new(max_offset),
            bypass_low_delay: DelayLine::new(max_offset),
            bypass_high_delay: DelayLine::new(max_offset),
        }
    }

    fn set_cutoff(&mut self, sample_rate: f64, cutoff: f64) {
        for chain in [
            &mut self.pre_lpf,
            &mut self.post_lpf,
            &mut self.bypass_pre_lpf,
            &mut self.bypass_post_lpf,
        ] {
            *chain = FilterChain::butterworth_order4(FilterType::Lowpass, cutoff, sample_rate);
        }
        for chain in [
            &mut self.pre_hpf,
            &mut self.post_hpf,
            &mut self.bypass_pre_hpf,
            &mut self.bypass_post_hpf,
        ] {
            *chain = FilterChain::butterworth_order4(FilterType::Highpass, cutoff, sample_rate);
        }
    }
}

pub struct TemporalDistortionSimulator {
    sample_rate: u32,
    block_size: usize,
    max_offset: usize,
    enabled: EarPair<bool>,
    paths: EarPair<EarPath>,
    noise: EarPair<NoiseGenerator>,
    /// 0 = independent ears, 1 = right ear reuses the left noise.
    synchronicity: f32,
    noise_power_samples2: EarPair<f32>,
    noise_autocorrelation: EarPair<f32>,
    // Pre-sized work buffers
    low: Vec<Sample>,
    high: Vec<Sample>,
    delayed_extended: Vec<Sample>,
    jittered: Vec<Sample>,
    noise_block: EarPair<Vec<Sample>>,
}

impl std::fmt::Debug for TemporalDistortionSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalDistortionSimulator")
            .field("block_size", &self.block_size)
            .field("max_offset", &self.max_offset)
            .finish()
    }
}

impl TemporalDistortionSimulator {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let max_offset = block_size / 2;
        let make_path = || {
            EarPath::new(
                sample_rate as f64,
                DEFAULT_BAND_UPPER_LIMIT_HZ,
                max_offset,
            )
        };
        let make_noise = |seed: u64| {
            let mut g = NoiseGenerator::with_seed(0.0, seed);
            g.enable_autocorrelation_filter(
                sample_rate as f64,
                DEFAULT_AUTOCORRELATION_CUTOFF_HZ,
                DEFAULT_AUTOCORRELATION_Q,
            );
            g
        };
        Self {
            sample_rate,
            block_size,
            max_offset,
            enabled: EarPair::new(false, false),
            paths: EarPair::new(make_path(), make_path()),
            noise: EarPair::new(make_noise(0x6175_0001), make_noise(0x6175_0002)),
            synchronicity: 0.0,
            noise_power_samples2: EarPair::new(0.0, 0.0),
            noise_autocorrelation: EarPair::new(0.0, 0.0),
            low: vec![0.0; block_size],
            high: vec![0.0; block_size],
            delayed_extended: vec![0.0; block_size + 2 * max_offset],
            jittered: vec![0.0; block_size],
            noise_block: EarPair::new(vec![0.0; block_size], vec![0.0; block_size]),
        }
    }

    pub fn set_enabled(&mut self, ear: Ear, enabled: bool) {
        self.enabled.for_each_selected(ear, |e| *e = enabled);
    }

    pub fn is_enabled(&self, ear: Ear) -> bool {
        *self.enabled.get(ear).unwrap_or(&false)
    }

    /// White-noise power expressed as a time in milliseconds; the standard
    /// deviation of the tap offset is `rate * power / 1000` samples.
    pub fn set_white_noise_power(&mut self, ear: Ear, power_ms: f32) {
        let deviation = self.sample_rate as f32 * power_ms / 1000.0;
        self.noise
            .for_each_selected(ear, |n| n.set_deviation(deviation));
    }

    pub fn set_noise_autocorrelation_cutoff(&mut self, ear: Ear, cutoff_hz: f64) {
        self.noise
            .for_each_selected(ear, |n| n.set_autocorrelation_cutoff(cutoff_hz));
    }

    pub fn set_band_upper_limit(&mut self, ear: Ear, cutoff_hz: f64) {
        let rate = self.sample_rate as f64;
        self.paths
            .for_each_selected(ear, |p| p.set_cutoff(rate, cutoff_hz));
    }

    pub fn set_left_right_synchronicity(&mut self, synchronicity: f32) {
        self.synchronicity = synchronicity.clamp(0.0, 1.0);
    }

    /// Measured mean power of the last noise block, as milliseconds.
    pub fn noise_power_ms(&self, ear: Ear) -> f32 {
        let samples2 = *self.noise_power_samples2.get(ear).unwrap_or(&0.0);
        samples2.sqrt() * 1000.0 / self.sample_rate as f32
    }

    /// One-lag normalized autocorrelation of the last noise block.
    pub fn normalized_autocorrelation(&self, ear: Ear) -> f32 {
        *self.noise_autocorrelation.get(ear).unwrap_or(&0.0)
    }

    fn process_ear(
        paths: &mut EarPath,
        enabled: bool,
        noise_block: &[Sample],
        max_offset: usize,
        input: &[Sample],
        output: &mut [Sample],
        low: &mut [Sample],
        high: &mut [Sample],
        delayed_extended: &mut [Sample],
        jittered: &mut [Sample],
    ) {
        if enabled {
            paths.pre_lpf.process_to(input, low);
            paths.pre_hpf.process_to(input, high);

            // Jitter the low band: per-sample wandering tap into the
            // extended (history + block) view of the delay line.
            paths.jitter_delay.process_extended(low, delayed_extended);
            for i in 0..jittered.len() {
                let mut offset = noise_block[i] as i64;
                let limit = max_offset as i64;
                offset = offset.clamp(-(limit - 1), limit - 1);
                jittered[i] = delayed_extended[(i as i64 + limit + offset) as usize];
            }

            // Align the high band with the jitter path's centre delay.
            paths.high_delay.process(high, low);

            paths.post_lpf.process_to(jittered, high);
            paths.post_hpf.process(low);
            for (o, (a, b)) in output.iter_mut().zip(high.iter().zip(low.iter())) {
                *o = a + b;
            }
        } else {
            // Matched bypass: same filters and delays, no jitter.
            paths.bypass_pre_lpf.process_to(input, low);
            paths.bypass_pre_hpf.process_to(input, high);
            paths.bypass_low_delay.process(low, jittered);
            paths.bypass_high_delay.process(high, low);
            paths.bypass_post_lpf.process_to(jittered, high);
            paths.bypass_post_hpf.process(low);
            for (o, (a, b)) in output.iter_mut().zip(high.iter().zip(low.iter())) {
                *o = a + b;
            }
        }
    }

    pub fn process(&mut self, input: &EarPair<Vec<Sample>>, output: &mut EarPair<Vec<Sample>>) {
        if !self.enabled.left && !self.enabled.right {
            output.left.copy_from_slice(&input.left);
            output.right.copy_from_slice(&input.right);
            return;
        }

        // Noise sources, mixed by the synchronicity coefficient.
        self.noise.left.process(&mut self.noise_block.left);
        self.noise.right.process(&mut self.noise_block.right);
        let sync = self.synchronicity;
        for i in 0..self.block_size {
            self.noise_block.right[i] =
                self.noise_block.left[i] * sync + self.noise_block.right[i] * (1.0 - sync);
        }

        let shift =
            (AUTOCORRELATION_SHIFT_MS * self.sample_rate as f32 / 1000.0).round() as usize;
        self.noise_power_samples2.left = buffer::power(&self.noise_block.left);
        self.noise_power_samples2.right = buffer::power(&self.noise_block.right);
        self.noise_autocorrelation.left = if self.noise_power_samples2.left > 1e-12 {
            buffer::autocorrelation(&self.noise_block.left, shift) / self.noise_power_samples2.left
        } else {
            0.0
        };
        self.noise_autocorrelation.right = if self.noise_power_samples2.right > 1e-12 {
            buffer::autocorrelation(&self.noise_block.right, shift)
                / self.noise_power_samples2.right
        } else {
            0.0
        };

        Self::process_ear(
            &mut self.paths.left,
            self.enabled.left,
            &self.noise_block.left,
            self.max_offset,
            &input.left,
            &mut output.left,
            &mut self.low,
            &mut self.high,
            &mut self.delayed_extended,
            &mut self.jittered,
        );
        Self::process_ear(
            &mut self.paths.right,
            self.enabled.right,
            &self.noise_block.right,
            self.max_offset,
            &input.right,
            &mut output.right,
            &mut self.low,
            &mut self.high,
            &mut self.delayed_extended,
            &mut self.jittered,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_block(block: usize, f: impl Fn(usize) -> f32) -> EarPair<Vec<f32>> {
        let b: Vec<f32> = (0..block).map(f).collect();
        EarPair::new(b.clone(), b)
    }

    #[test]
    fn test_full_bypass_is_identity() {
        let mut sim = TemporalDistortionSimulator::new(44_100, 256);
        let input = stereo_block(256, |i| (i as f32 * 0.1).sin());
        let mut output = stereo_block(256, |_| 0.0);
        sim.process(&input, &mut output);
        assert_eq!(input.left, output.left);
        assert_eq!(input.right, output.right);
    }

    #[test]
    fn test_zero_noise_matches_bypass_energy() {
        // With zero jitter power, the enabled path is only the split/delay/
        // merge chain; energy must be preserved within filter tolerance.
        let mut enabled = TemporalDistortionSimulator::new(44_100, 256);
        enabled.set_enabled(Ear::Both, true);
        enabled.set_white_noise_power(Ear::Both, 0.0);

        let mut bypassed = TemporalDistortionSimulator::new(44_100, 256);
        bypassed.set_enabled(Ear::Left, true);
        bypassed.set_white_noise_power(Ear::Both, 0.0);

        let mut out_a = stereo_block(256, |_| 0.0);
        let mut out_b = stereo_block(256, |_| 0.0);
        for b in 0..20 {
            let input = stereo_block(256, |i| ((b * 256 + i) as f32 * 0.05).sin());
            enabled.process(&input, &mut out_a);
            bypassed.process(&input, &mut out_b);
        }
        // Enabled-with-zero-noise and bypass paths stay aligned.
        for (a, b) in out_a.left.iter().zip(out_b.right.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_jitter_disturbs_low_band(){
        let mut sim = TemporalDistortionSimulator::new(44_100, 512);
        sim.set_enabled(Ear::Both, true);
        sim.set_white_noise_power(Ear::Both, 2.0);

        let mut reference = TemporalDistortionSimulator::new(44_100, 512);
        reference.set_enabled(Ear::Both, true);
        reference.set_white_noise_power(Ear::Both, 0.0);

        // 200 Hz tone, inside the jittered band
        let tone = |b: usize| {
            stereo_block(512, move |i| {
                (std::f32::consts::TAU * 200.0 * ((b * 512 + i) as f32) / 44_100.0).sin()
            })
        };
        let mut jittered = stereo_block(512, |_| 0.0);
        let mut clean = stereo_block(512, |_| 0.0);
        let mut difference = 0.0f32;
        for b in 0..20 {
            let input = tone(b);
            sim.process(&input, &mut jittered);
            reference.process(&input, &mut clean);
            if b > 4 {
                difference += jittered
                    .left
                    .iter()
                    .zip(clean.left.iter())
                    .map(|(x, y)| (x - y).abs())
                    .sum::<f32>();
            }
        }
        assert!(difference > 1.0, "jitter had no effect: {difference}");
    }

    #[test]
    fn test_synchronicity_one_syncs_ears() {
        let mut sim = TemporalDistortionSimulator::new(44_100, 256);
        sim.set_enabled(Ear::Both, true);
        sim.set_white_noise_power(Ear::Both, 1.0);
        sim.set_left_right_synchronicity(1.0);

        let input = stereo_block(256, |i| (i as f32 * 0.07).sin());
        let mut output = stereo_block(256, |_| 0.0);
        for _ in 0..10 {
            sim.process(&input, &mut output);
        }
        // Identical inputs + identical noise => identical outputs.
        for (l, r) in output.left.iter().zip(output.right.iter()) {
            assert!((l - r).abs() < 1e-6);
        }
    }

    #[test]
    fn test_noise_metrics_exposed() {
        let mut sim = TemporalDistortionSimulator::new(44_100, 512);
        sim.set_enabled(Ear::Left, true);
        sim.set_white_noise_power(Ear::Both, 1.0);
        let input = stereo_block(512, |_| 0.0);
        let mut output = stereo_block(512, |_| 0.0);
        sim.process(&input, &mut output);
        assert!(sim.noise_power_ms(Ear::Left) > 0.0);
        // Band-limited noise is positively correlated at one lag... at 44.1k
        // a 1 ms shift spans 44 samples of a 500 Hz-limited process.
        assert!(sim.normalized_autocorrelation(Ear::Left).abs() <= 1.0);
    }
}
