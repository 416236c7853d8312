//! Octave-banded expander filterbank
//!
//! Nine octave bands from 62.5 Hz, each covered by `filters_per_band`
//! band-pass sections. Every section runs its own downward expander and a
//! linear attenuation; sections between two octave centres take linearly
//! interpolated parameters from the adjacent bands.

use au_core::Sample;
use au_dsp::{BiquadFilter, Expander, FilterType};

pub const OCTAVE_BAND_COUNT: usize = 9;
pub const FIRST_BAND_HZ: f32 = 62.5;
pub const DEFAULT_FILTERS_PER_BAND: usize = 3;

/// Centre frequency of octave band `index`.
pub fn band_frequency(index: usize) -> f32 {
    FIRST_BAND_HZ * 2f32.powi(index as i32)
}

/// Parameters applied to one filter of the bank.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterParams {
    pub threshold_dbfs: f32,
    pub ratio: f32,
    pub attenuation_db: f32,
}

#[derive(Debug)]
struct BandFilter {
    filter: BiquadFilter,
    expander: Expander,
    frequency: f32,
    attenuation_gain: Sample,
}

#[derive(Debug)]
pub struct MultibandExpander {
    filters: Vec<BandFilter>,
    filters_per_band: usize,
    band_attenuations_db: [f32; OCTAVE_BAND_COUNT],
    scratch: Vec<Sample>,
    ready: bool,
}

impl MultibandExpander {
    pub fn new(sample_rate: f32, block_size: usize, filters_per_band: usize) -> Self {
        let filters_per_band = filters_per_band.max(1);
        let step = 2f64.powf(1.0 / filters_per_band as f64);
        let q = step.sqrt() / (step - 1.0);

        let total = OCTAVE_BAND_COUNT * filters_per_band;
        let mut filters = Vec::with_capacity(total);
        for i in 0..total {
            // The centre filter of each band sits on the octave frequency.
            let exponent = (i as f64 - (filters_per_band as f64 - 1.0) / 2.0)
                / filters_per_band as f64;
            let frequency = FIRST_BAND_HZ as f64 * 2f64.powf(exponent);
            let mut filter = BiquadFilter::new();
            filter.setup(FilterType::Bandpass, frequency, q, sample_rate as f64);
            filters.push(BandFilter {
                filter,
                expander: Expander::new(sample_rate),
                frequency: frequency as f32,
                attenuation_gain: 1.0,
            });
        }

        Self {
            filters,
            filters_per_band,
            band_attenuations_db: [0.0; OCTAVE_BAND_COUNT],
            scratch: vec![0.0; block_size],
            ready: false,
        }
    }

    pub fn num_filters(&self) -> usize {
        self.filters.len()
    }

    pub fn filters_per_band(&self) -> usize {
        self.filters_per_band
    }

    pub fn filter_frequency(&self, index: usize) -> f32 {
        self.filters[index].frequency
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_attack_all(&mut self, attack_ms: f32, release_ms: f32) {
        for f in &mut self.filters {
            f.expander.set_times(attack_ms, release_ms);
        }
    }

    pub fn band_attenuation_db(&self, band: usize) -> f32 {
        self.band_attenuations_db[band]
    }

    pub fn set_band_attenuation_db(&mut self, band: usize, attenuation_db: f32) {
        self.band_attenuations_db[band] = attenuation_db;
    }

    /// Interpolate a per-band table at a filter frequency: linear between
    /// the two bracketing octave centres, flat beyond the outer bands.
    pub fn interpolate_at(frequency: f32, table: &[f32]) -> f32 {
        debug_assert!(!table.is_empty());
        if frequency <= band_frequency(0) {
            return table[0];
        }
        let last = table.len() - 1;
        if frequency >= band_frequency(last) {
            return table[last];
        }
        for b in 0..last {
            let lo = band_frequency(b);
            let hi = band_frequency(b + 1);
            if frequency >= lo && frequency < hi {
                let lower_weight = (hi - frequency) / (hi - lo);
                let upper_weight = (frequency - lo) / (hi - lo);
                return lower_weight * table[b] + upper_weight * table[b + 1];
            }
        }
        table[last]
    }

    /// Install expander settings for one filter.
    pub fn set_filter_params(&mut self, index: usize, params: FilterParams) {
        let f = &mut self.filters[index];
        f.expander.set_threshold_db(params.threshold_dbfs);
        f.expander.set_ratio(params.ratio);
        f.attenuation_gain = 10f32.powf(-params.attenuation_db / 20.0);
        self.ready = true;
    }

    /// Sum of all filtered, expanded, attenuated sections.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), output.len());
        output.fill(0.0);
        if self.scratch.len() < input.len() {
            self.scratch.resize(input.len(), 0.0);
        }
        for f in &mut self.filters {
            let scratch = &mut self.scratch[..input.len()];
            f.filter.process_to(input, scratch);
            f.expander.process(scratch);
            for (o, s) in output.iter_mut().zip(scratch.iter()) {
                *o += *s * f.attenuation_gain;
            }
        }
    }

    pub fn reset(&mut self) {
        for f in &mut self.filters {
            f.filter.reset();
            f.expander.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_frequencies() {
        assert!((band_frequency(0) - 62.5).abs() < 1e-4);
        assert!((band_frequency(8) - 16_000.0).abs() < 1e-1);
    }

    #[test]
    fn test_centre_filters_sit_on_band_centres() {
        let mb = MultibandExpander::new(44_100.0, 512, 3);
        assert_eq!(mb.num_filters(), 27);
        // Middle filter of band 0 is filter index 1
        assert!((mb.filter_frequency(1) - 62.5).abs() < 0.1);
        assert!((mb.filter_frequency(4) - 125.0).abs() < 0.2);
    }

    #[test]
    fn test_interpolation_between_bands() {
        let table = [0.0, 10.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0];
        // Exactly on a centre
        assert!((MultibandExpander::interpolate_at(125.0, &table) - 10.0).abs() < 1e-3);
        // Halfway (in linear frequency) between 62.5 and 125
        let mid = MultibandExpander::interpolate_at(93.75, &table);
        assert!((mid - 5.0).abs() < 1e-3);
        // Beyond the edges
        assert!((MultibandExpander::interpolate_at(10.0, &table) - 0.0).abs() < 1e-6);
        assert!((MultibandExpander::interpolate_at(30_000.0, &table) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_attenuation_applies_per_filter() {
        let mut mb = MultibandExpander::new(44_100.0, 512, 1);
        for i in 0..mb.num_filters() {
            mb.set_filter_params(
                i,
                FilterParams {
                    threshold_dbfs: -200.0, // expander never engages
                    ratio: 1.0,
                    attenuation_db: 20.0,
                },
            );
        }
        // 1 kHz tone, strongly inside the bank's range
        let input: Vec<f32> = (0..8192)
            .map(|i| (std::f32::consts::TAU * 1000.0 * i as f32 / 44_100.0).sin())
            .collect();
        let mut with_attenuation = vec![0.0; 8192];
        mb.process(&input, &mut with_attenuation);

        let mut flat = MultibandExpander::new(44_100.0, 512, 1);
        for i in 0..flat.num_filters() {
            flat.set_filter_params(
                i,
                FilterParams {
                    threshold_dbfs: -200.0,
                    ratio: 1.0,
                    attenuation_db: 0.0,
                },
            );
        }
        let mut reference = vec![0.0; 8192];
        flat.process(&input, &mut reference);

        let rms = |b: &[f32]| (b[4096..].iter().map(|s| s * s).sum::<f32>() / 4096.0).sqrt();
        let drop_db = 20.0 * (rms(&with_attenuation) / rms(&reference)).log10();
        assert!((drop_db + 20.0).abs() < 1.0, "drop {drop_db} dB");
    }
}
