//! Level-dependent multiband equalizer
//!
//! A bank of band-pass sections at fractional-octave centres. Each band has
//! one gain per level curve; the gain actually applied interpolates between
//! the two curves whose thresholds bracket the current envelope level. An
//! overall offset (used by the normalization feature) shifts every curve.

use au_core::Sample;
use au_dsp::{BiquadFilter, EnvelopeFollower, FilterType};

#[derive(Debug)]
struct EqBand {
    filter: BiquadFilter,
    frequency: f32,
}

#[derive(Debug)]
pub struct DynamicEqualizer {
    bands: Vec<EqBand>,
    num_levels: usize,
    /// Envelope threshold per level, in dB FS. Level indices are caller
    /// semantics (the Fig6 fitter makes level 0 the central curve); the
    /// interpolation works on a threshold-sorted view.
    level_thresholds: Vec<f32>,
    /// `level_gains_db[level][band]`
    level_gains_db: Vec<Vec<f32>>,
    overall_offset_db: f32,
    envelope: EnvelopeFollower,
    scratch: Vec<Sample>,
    applied_gains: Vec<f32>,
    /// Scratch for the threshold-sorted level view, reused across blocks.
    level_order: Vec<usize>,
}

impl DynamicEqualizer {
    pub fn new(
        sample_rate: f32,
        block_size: usize,
        num_levels: usize,
        ini_freq_hz: f32,
        num_bands: usize,
        bands_per_octave: usize,
    ) -> Self {
        let bands_per_octave = bands_per_octave.max(1);
        let step = 2f64.powf(1.0 / bands_per_octave as f64);
        let q = step.sqrt() / (step - 1.0);
        let mut bands = Vec::with_capacity(num_bands);
        for k in 0..num_bands {
            let frequency = ini_freq_hz as f64 * step.powi(k as i32);
            let mut filter = BiquadFilter::new();
            filter.setup(FilterType::Bandpass, frequency, q, sample_rate as f64);
            bands.push(EqBand {
                filter,
                frequency: frequency as f32,
            });
        }
        let mut envelope = EnvelopeFollower::new(sample_rate);
        envelope.set_times(20.0, 100.0);
        Self {
            bands,
            num_levels,
            level_thresholds: vec![0.0; num_levels],
            level_gains_db: vec![vec![0.0; num_bands]; num_levels],
            overall_offset_db: 0.0,
            envelope,
            scratch: vec![0.0; block_size],
            applied_gains: vec![1.0; num_bands],
            level_order: (0..num_levels).collect(),
        }
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn band_frequency(&self, band: usize) -> f32 {
        self.bands[band].frequency
    }

    pub fn set_level_threshold(&mut self, level: usize, threshold_dbfs: f32) {
        if let Some(t) = self.level_thresholds.get_mut(level) {
            *t = threshold_dbfs;
        }
    }

    pub fn level_threshold(&self, level: usize) -> f32 {
        self.level_thresholds[level]
    }

    pub fn set_level_band_gain_db(&mut self, level: usize, band: usize, gain_db: f32) {
        if let Some(curve) = self.level_gains_db.get_mut(level) {
            if let Some(g) = curve.get_mut(band) {
                *g = gain_db;
            }
        }
    }

    pub fn level_band_gain_db(&self, level: usize, band: usize) -> f32 {
        self.level_gains_db[level][band]
    }

    /// Same gain curve for every level (static EQ behaviour).
    pub fn set_band_gain_db_all_levels(&mut self, band: usize, gain_db: f32) {
        for level in 0..self.num_levels {
            self.set_level_band_gain_db(level, band, gain_db);
        }
    }

    pub fn set_overall_offset_db(&mut self, offset_db: f32) {
        self.overall_offset_db = offset_db;
    }

    pub fn overall_offset_db(&self) -> f32 {
        self.overall_offset_db
    }

    pub fn set_attack_release(&mut self, attack_ms: f32, release_ms: f32) {
        self.envelope.set_times(attack_ms, release_ms);
    }

    /// Band gains for a given envelope level: interpolate between the two
    /// bracketing level curves, clamped flat beyond the extremes.
    fn gains_for_level(&mut self, level_dbfs: f32, out: &mut [f32]) {
        if self.num_levels == 0 {
            let flat = 10f32.powf(self.overall_offset_db / 20.0);
            out.fill(flat);
            return;
        }
        // Threshold-sorted level indices; the scratch vector keeps its
        // capacity between blocks.
        let thresholds = &self.level_thresholds;
        let mut order = std::mem::take(&mut self.level_order);
        order.sort_by(|a, b| {
            thresholds[*a]
                .partial_cmp(&thresholds[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (lower, upper, t) = if self.num_levels == 1
            || level_dbfs <= self.level_thresholds[order[0]]
        {
            (order[0], order[0], 0.0)
        } else if level_dbfs >= self.level_thresholds[*order.last().unwrap()] {
            let last = *order.last().unwrap();
            (last, last, 0.0)
        } else {
            let mut pair = (order[0], order[1], 0.0);
            for w in order.windows(2) {
                let lo = self.level_thresholds[w[0]];
                let hi = self.level_thresholds[w[1]];
                if level_dbfs >= lo && level_dbfs < hi {
                    pair = (w[0], w[1], (level_dbfs - lo) / (hi - lo));
                    break;
                }
            }
            pair
        };

        for (band, g) in out.iter_mut().enumerate() {
            let gain_db = (1.0 - t) * self.level_gains_db[lower][band]
                + t * self.level_gains_db[upper][band]
                + self.overall_offset_db;
            *g = 10f32.powf(gain_db / 20.0);
        }
        self.level_order = order;
    }

    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());

        // Track the envelope across the block, use its final value.
        let mut env = self.envelope.current();
        for s in input {
            env = self.envelope.process(*s);
        }
        let level_dbfs = if env > 1e-6 {
            20.0 * env.log10()
        } else {
            -120.0
        };

        let mut gains = std::mem::take(&mut self.applied_gains);
        self.gains_for_level(level_dbfs, &mut gains);

        output.fill(0.0);
        if self.scratch.len() < input.len() {
            self.scratch.resize(input.len(), 0.0);
        }
        for (band, gain) in self.bands.iter_mut().zip(gains.iter()) {
            let scratch = &mut self.scratch[..input.len()];
            band.filter.process_to(input, scratch);
            for (o, s) in output.iter_mut().zip(scratch.iter()) {
                *o += *s * *gain;
            }
        }
        self.applied_gains = gains;
    }

    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.filter.reset();
        }
        self.envelope.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_eq() -> DynamicEqualizer {
        // 7 octave bands from 125 Hz, 3 levels
        DynamicEqualizer::new(44_100.0, 512, 3, 125.0, 7, 1)
    }

    #[test]
    fn test_band_frequencies() {
        let eq = make_eq();
        assert!((eq.band_frequency(0) - 125.0).abs() < 0.01);
        assert!((eq.band_frequency(6) - 8000.0).abs() < 1.0);
    }

    #[test]
    fn test_level_interpolation_midpoint() {
        let mut eq = make_eq();
        eq.set_level_threshold(0, -40.0);
        eq.set_level_threshold(1, -60.0);
        eq.set_level_threshold(2, -20.0);
        for band in 0..7 {
            eq.set_level_band_gain_db(1, band, 0.0);
            eq.set_level_band_gain_db(0, band, 10.0);
            eq.set_level_band_gain_db(2, band, 20.0);
        }
        // Envelope at -50 dB is halfway between level 1 (-60) and level 0
        // (-40): expect 5 dB.
        let mut gains = vec![0.0; 7];
        eq.gains_for_level(-50.0, &mut gains);
        let expected = 10f32.powf(5.0 / 20.0);
        for g in gains {
            assert!((g - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_levels_clamp_outside_range() {
        let mut eq = make_eq();
        eq.set_level_threshold(0, -40.0);
        eq.set_level_threshold(1, -60.0);
        eq.set_level_threshold(2, -20.0);
        for band in 0..7 {
            eq.set_level_band_gain_db(1, band, -6.0);
            eq.set_level_band_gain_db(2, band, 12.0);
        }
        let mut gains = vec![0.0; 7];
        eq.gains_for_level(-90.0, &mut gains);
        assert!((gains[0] - 10f32.powf(-6.0 / 20.0)).abs() < 1e-4);
        eq.gains_for_level(0.0, &mut gains);
        assert!((gains[0] - 10f32.powf(12.0 / 20.0)).abs() < 1e-4);
    }

    #[test]
    fn test_overall_offset_shifts_gains() {
        let mut eq = make_eq();
        eq.set_overall_offset_db(-10.0);
        let mut gains = vec![0.0; 7];
        eq.gains_for_level(-30.0, &mut gains);
        let expected = 10f32.powf(-10.0 / 20.0);
        for g in gains {
            assert!((g - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_in_band_tone_passes() {
        let mut eq = make_eq();
        // Flat 0 dB curves
        let input: Vec<f32> = (0..16_384)
            .map(|i| (std::f32::consts::TAU * 1000.0 * i as f32 / 44_100.0).sin())
            .collect();
        let mut output = vec![0.0; 16_384];
        eq.process(&input, &mut output);
        let rms_in = (input[8192..].iter().map(|s| s * s).sum::<f32>() / 8192.0).sqrt();
        let rms_out = (output[8192..].iter().map(|s| s * s).sum::<f32>() / 8192.0).sqrt();
        let ratio_db = 20.0 * (rms_out / rms_in).log10();
        // A 1 kHz tone sits at an octave centre; the overlapping neighbours
        // add a little energy.
        assert!(ratio_db.abs() < 4.0, "ratio {ratio_db} dB");
    }
}
