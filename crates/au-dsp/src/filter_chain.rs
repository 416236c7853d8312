//! Serial chains, parallel banks and the octave graphic EQ

use au_core::Sample;

use crate::biquad::{BiquadCoeffs, BiquadFilter, FilterType};

/// Two-stage Butterworth Q values for a 4th-order split.
pub const BUTTERWORTH_Q_ORDER4: [f64; 2] = [0.541_196_10, 1.306_563_0];

/// Second-order sections in series.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<BiquadFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A 4th-order Butterworth low- or high-pass as two cascaded sections.
    pub fn butterworth_order4(kind: FilterType, freq: f64, sample_rate: f64) -> Self {
        let mut chain = Self::new();
        for q in BUTTERWORTH_Q_ORDER4 {
            let mut f = BiquadFilter::new();
            f.setup(kind, freq, q, sample_rate);
            chain.filters.push(f);
        }
        chain
    }

    pub fn add_filter(&mut self) -> &mut BiquadFilter {
        self.filters.push(BiquadFilter::new());
        self.filters.last_mut().unwrap()
    }

    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn filter_mut(&mut self, index: usize) -> Option<&mut BiquadFilter> {
        self.filters.get_mut(index)
    }

    /// Retune every section to the same response (used by the HA shelving
    /// cut-off setters).
    pub fn setup_all(&mut self, kind: FilterType, freq: f64, q: f64, sample_rate: f64) {
        for f in &mut self.filters {
            f.set_coeffs(BiquadCoeffs::of_type(kind, freq, q, sample_rate));
        }
    }

    pub fn process(&mut self, buffer: &mut [Sample]) {
        for f in &mut self.filters {
            f.process(buffer);
        }
    }

    pub fn process_to(&mut self, input: &[Sample], output: &mut [Sample]) {
        output.copy_from_slice(input);
        self.process(output);
    }

    pub fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }
}

/// Standard nine octave bands starting at 62.5 Hz.
pub const OCTAVE_BAND_COUNT: usize = 9;
pub const FIRST_OCTAVE_BAND_HZ: f64 = 62.5;

/// Centre frequency of octave band `index`.
pub fn octave_band_frequency(index: usize) -> f64 {
    FIRST_OCTAVE_BAND_HZ * 2f64.powi(index as i32)
}

/// Parallel bank of band filters with per-band gains; the outputs sum.
/// The first band is a low-pass and the last a high-pass so the bank covers
/// the whole spectrum; middle bands are band-passes with Q = sqrt(2).
#[derive(Debug, Clone)]
pub struct GraphicEq {
    filters: Vec<BiquadFilter>,
    scratch: Vec<Sample>,
}

impl GraphicEq {
    /// Nine-band octave EQ. `block_size` pre-sizes the scratch buffer.
    pub fn octave_bands(sample_rate: f64, block_size: usize) -> Self {
        // Octave spacing: Q = sqrt(2) / (2 - 1)
        let q = 2f64.sqrt();
        let mut filters = Vec::with_capacity(OCTAVE_BAND_COUNT);
        for band in 0..OCTAVE_BAND_COUNT {
            let freq = octave_band_frequency(band);
            let kind = if band == 0 {
                FilterType::Lowpass
            } else if band == OCTAVE_BAND_COUNT - 1 {
                FilterType::Highpass
            } else {
                FilterType::Bandpass
            };
            let mut f = BiquadFilter::new();
            f.setup(kind, freq, q, sample_rate);
            filters.push(f);
        }
        Self {
            filters,
            scratch: vec![0.0; block_size],
        }
    }

    pub fn num_bands(&self) -> usize {
        self.filters.len()
    }

    pub fn set_band_gain(&mut self, band: usize, gain: Sample) {
        if let Some(f) = self.filters.get_mut(band) {
            f.set_gain(gain);
        }
    }

    pub fn set_band_gains(&mut self, gains: &[Sample]) {
        for (f, g) in self.filters.iter_mut().zip(gains.iter()) {
            f.set_gain(*g);
        }
    }

    /// Filter `input` through every band and sum into `output`.
    pub fn process_to(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());
        output.fill(0.0);
        if self.scratch.len() < input.len() {
            self.scratch.resize(input.len(), 0.0);
        }
        for f in &mut self.filters {
            let scratch = &mut self.scratch[..input.len()];
            f.process_to(input, scratch);
            for (o, s) in output.iter_mut().zip(scratch.iter()) {
                *o += *s;
            }
        }
    }

    pub fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octave_band_frequencies() {
        assert!((octave_band_frequency(0) - 62.5).abs() < 1e-9);
        assert!((octave_band_frequency(3) - 500.0).abs() < 1e-9);
        assert!((octave_band_frequency(8) - 16_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_unity_bank_roughly_flat_on_dc() {
        let mut eq = GraphicEq::octave_bands(44_100.0, 512);
        let input = vec![1.0f32; 8192];
        let mut output = vec![0.0f32; 8192];
        eq.process_to(&input, &mut output);
        // DC survives through the low band; steady-state output close to 1.
        let tail = output[6000..].iter().sum::<f32>() / 2192.0;
        assert!((tail - 1.0).abs() < 0.2, "tail mean {tail}");
    }

    #[test]
    fn test_zero_gains_silence() {
        let mut eq = GraphicEq::octave_bands(44_100.0, 64);
        eq.set_band_gains(&[0.0; 9]);
        let input = vec![0.5f32; 64];
        let mut output = vec![1.0f32; 64];
        eq.process_to(&input, &mut output);
        assert!(output.iter().all(|s| s.abs() < 1e-9));
    }

    #[test]
    fn test_butterworth_chain_has_two_sections() {
        let chain = FilterChain::butterworth_order4(FilterType::Lowpass, 500.0, 44_100.0);
        assert_eq!(chain.num_filters(), 2);
    }
}
