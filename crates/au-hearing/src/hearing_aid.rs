//! Hearing-aid simulator
//!
//! Per ear: optional pre-quantization, a level-dependent equalizer, low- and
//! high-pass shaping of the useful band, optional post-quantization and an
//! overall gain. The Fig6 prescription fills the equalizer's three level
//! curves from an audiogram; normalization pins the loudest point of the
//! reference curve to a target level.

use au_core::{Ear, EarPair, Sample};
use au_dsp::{FilterChain, FilterType};

use crate::dynamic_eq::DynamicEqualizer;

pub const DEFAULT_NUM_LEVELS: usize = 3;
pub const DEFAULT_INI_FREQ_HZ: f32 = 125.0;
pub const DEFAULT_NUM_BANDS: usize = 7;
pub const DEFAULT_BANDS_PER_OCTAVE: usize = 1;
pub const DEFAULT_LPF_CUTOFF_HZ: f64 = 3000.0;
pub const DEFAULT_HPF_CUTOFF_HZ: f64 = 500.0;

/// Fig6 prescribed insertion gain for a 40 dB SPL input.
pub fn fig6_gain_40(dbhl: f32) -> f32 {
    if dbhl < 20.0 {
        0.0
    } else if dbhl <= 60.0 {
        dbhl - 20.0
    } else {
        0.5 * dbhl + 10.0
    }
}

/// Fig6 prescribed insertion gain for a 65 dB SPL input.
pub fn fig6_gain_65(dbhl: f32) -> f32 {
    if dbhl < 20.0 {
        0.0
    } else if dbhl <= 60.0 {
        0.6 * (dbhl - 20.0)
    } else {
        0.8 * dbhl - 23.0
    }
}

/// Fig6 prescribed insertion gain for a 95 dB SPL input.
pub fn fig6_gain_95(dbhl: f32) -> f32 {
    if dbhl <= 40.0 {
        0.0
    } else {
        0.1 * (dbhl - 40.0).powf(1.4)
    }
}

/// Symmetric mid-tread quantization to `bits`, clipping to [-1, 1].
pub fn quantize(buffer: &mut [Sample], bits: u32) {
    let num_values = 2f32.powi(bits as i32);
    if num_values <= 0.0 {
        return;
    }
    for s in buffer.iter_mut() {
        let clipped = s.clamp(-1.0, 1.0);
        let level = (num_values * (0.5 + 0.5 * clipped)).trunc();
        *s = (level / num_values) * 2.0 - 1.0;
    }
}

pub struct HearingAidSim {
    enabled: EarPair<bool>,
    equalizer: EarPair<DynamicEqualizer>,
    lowpass: EarPair<FilterChain>,
    highpass: EarPair<FilterChain>,
    quantization_before: bool,
    quantization_after: bool,
    quantization_bits: u32,
    normalization_enabled: EarPair<bool>,
    normalization_reference_db: EarPair<f32>,
    overall_gain: EarPair<f32>,
    scratch: Vec<Sample>,
}

impl std::fmt::Debug for HearingAidSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HearingAidSim")
            .field("quantization_bits", &self.quantization_bits)
            .finish()
    }
}

impl HearingAidSim {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: u32,
        block_size: usize,
        num_levels: usize,
        ini_freq_hz: f32,
        num_bands: usize,
        bands_per_octave: usize,
        lpf_cutoff_hz: f64,
        hpf_cutoff_hz: f64,
    ) -> Self {
        let make_eq = || {
            DynamicEqualizer::new(
                sample_rate as f32,
                block_size,
                num_levels,
                ini_freq_hz,
                num_bands,
                bands_per_octave,
            )
        };
        // The low-pass bounds the top of the hearing-aid band and the
        // high-pass its bottom, each a 4th-order Butterworth.
        let make_lpf =
            || FilterChain::butterworth_order4(FilterType::Lowpass, lpf_cutoff_hz, sample_rate as f64);
        let make_hpf = || {
            FilterChain::butterworth_order4(FilterType::Highpass, hpf_cutoff_hz, sample_rate as f64)
        };
        Self {
            enabled: EarPair::new(false, false),
            equalizer: EarPair::new(make_eq(), make_eq()),
            lowpass: EarPair::new(make_lpf(), make_lpf()),
            highpass: EarPair::new(make_hpf(), make_hpf()),
            quantization_before: false,
            quantization_after: false,
            quantization_bits: 16,
            normalization_enabled: EarPair::new(false, false),
            normalization_reference_db: EarPair::new(0.0, 0.0),
            overall_gain: EarPair::new(1.0, 1.0),
            scratch: vec![0.0; block_size],
        }
    }

    pub fn default_config(sample_rate: u32, block_size: usize) -> Self {
        Self::new(
            sample_rate,
            block_size,
            DEFAULT_NUM_LEVELS,
            DEFAULT_INI_FREQ_HZ,
            DEFAULT_NUM_BANDS,
            DEFAULT_BANDS_PER_OCTAVE,
            DEFAULT_LPF_CUTOFF_HZ,
            DEFAULT_HPF_CUTOFF_HZ,
        )
    }

    pub fn set_enabled(&mut self, ear: Ear, enabled: bool) {
        self.enabled.for_each_selected(ear, |e| *e = enabled);
    }

    pub fn equalizer(&self, ear: Ear) -> Option<&DynamicEqualizer> {
        self.equalizer.get(ear)
    }

    pub fn equalizer_mut(&mut self, ear: Ear) -> Option<&mut DynamicEqualizer> {
        self.equalizer.get_mut(ear)
    }

    pub fn set_lowpass_cutoff(&mut self, cutoff_hz: f64, sample_rate: u32) {
        for chain in [&mut self.lowpass.left, &mut self.lowpass.right] {
            *chain =
                FilterChain::butterworth_order4(FilterType::Lowpass, cutoff_hz, sample_rate as f64);
        }
    }

    pub fn set_highpass_cutoff(&mut self, cutoff_hz: f64, sample_rate: u32) {
        for chain in [&mut self.highpass.left, &mut self.highpass.right] {
            *chain =
                FilterChain::butterworth_order4(FilterType::Highpass, cutoff_hz, sample_rate as f64);
        }
    }

    pub fn set_quantization(&mut self, before: bool, after: bool, bits: u32) {
        self.quantization_before = before;
        self.quantization_after = after;
        self.quantization_bits = bits;
    }

    pub fn set_overall_gain_db(&mut self, ear: Ear, gain_db: f32) {
        let gain = 10f32.powf(gain_db / 20.0);
        self.overall_gain.for_each_selected(ear, |g| *g = gain);
    }

    /// Fill the three level curves from an audiogram with the Fig6 fitting
    /// formula. Level 0 is the central 65 dB curve; levels 1 and 2 are the
    /// 40 and 95 dB curves. The equalizer must have exactly three levels.
    pub fn set_dynamic_eq_from_fig6(
        &mut self,
        ear: Ear,
        ear_loss_dbhl: &[f32],
        calibration_dbspl_for_0_dbfs: f32,
    ) -> Result<(), au_core::CoreError> {
        if self.equalizer.left.num_levels() != 3 {
            return Err(au_core::CoreError::NotAllowed(
                "the Fig6 fitting needs exactly three level curves".into(),
            ));
        }
        if ear_loss_dbhl.len() != self.equalizer.left.num_bands() {
            return Err(au_core::CoreError::InvalidParam(format!(
                "audiogram has {} bands, equalizer has {}",
                ear_loss_dbhl.len(),
                self.equalizer.left.num_bands()
            )));
        }

        self.equalizer.for_each_selected(ear, |eq| {
            // The central 65 dB curve must land on level 0: the dynamic EQ
            // references level 0 for normalization.
            eq.set_level_threshold(1, 40.0 - calibration_dbspl_for_0_dbfs);
            eq.set_level_threshold(0, 65.0 - calibration_dbspl_for_0_dbfs);
            eq.set_level_threshold(2, 95.0 - calibration_dbspl_for_0_dbfs);
            for (band, loss) in ear_loss_dbhl.iter().enumerate() {
                eq.set_level_band_gain_db(1, band, fig6_gain_40(*loss));
                eq.set_level_band_gain_db(0, band, fig6_gain_65(*loss));
                eq.set_level_band_gain_db(2, band, fig6_gain_95(*loss));
            }
        });
        self.apply_normalization(Ear::Both);
        Ok(())
    }

    pub fn set_normalization(&mut self, ear: Ear, enabled: bool, reference_db: f32) {
        self.normalization_enabled
            .for_each_selected(ear, |e| *e = enabled);
        self.normalization_reference_db
            .for_each_selected(ear, |r| *r = reference_db);
        self.apply_normalization(ear);
    }

    /// Offset every curve so the tallest point of the level-0 curve lands on
    /// the reference; boosting overall is never allowed (offset <= 0).
    fn apply_normalization(&mut self, ear: Ear) {
        let refs = self.normalization_reference_db;
        let enabled = self.normalization_enabled;
        let mut fix = |eq: &mut DynamicEqualizer, on: bool, reference: f32| {
            if !on {
                eq.set_overall_offset_db(0.0);
                return;
            }
            let mut max = f32::MIN;
            for band in 0..eq.num_bands() {
                max = max.max(eq.level_band_gain_db(0, band));
            }
            eq.set_overall_offset_db((reference - max).min(0.0));
        };
        match ear {
            Ear::Left => fix(&mut self.equalizer.left, enabled.left, refs.left),
            Ear::Right => fix(&mut self.equalizer.right, enabled.right, refs.right),
            Ear::Both => {
                fix(&mut self.equalizer.left, enabled.left, refs.left);
                fix(&mut self.equalizer.right, enabled.right, refs.right);
            }
            Ear::None => {}
        }
    }

    pub fn process(&mut self, input: &EarPair<Vec<Sample>>, output: &mut EarPair<Vec<Sample>>) {
        if !self.enabled.left && !self.enabled.right {
            output.left.copy_from_slice(&input.left);
            output.right.copy_from_slice(&input.right);
            return;
        }

        for (ear_enabled, in_block, out_block, eq, lpf, hpf, gain) in [
            (
                self.enabled.left,
                &input.left,
                &mut output.left,
                &mut self.equalizer.left,
                &mut self.lowpass.left,
                &mut self.highpass.left,
                self.overall_gain.left,
            ),
            (
                self.enabled.right,
                &input.right,
                &mut output.right,
                &mut self.equalizer.right,
                &mut self.lowpass.right,
                &mut self.highpass.right,
                self.overall_gain.right,
            ),
        ] {
            if !ear_enabled {
                out_block.copy_from_slice(in_block);
                continue;
            }
            if self.scratch.len() < in_block.len() {
                self.scratch.resize(in_block.len(), 0.0);
            }
            let scratch = &mut self.scratch[..in_block.len()];
            scratch.copy_from_slice(in_block);

            if self.quantization_before {
                quantize(scratch, self.quantization_bits);
            }
            eq.process(scratch, out_block);
            lpf.process(out_block);
            hpf.process(out_block);
            if self.quantization_after {
                quantize(out_block, self.quantization_bits);
            }
            for s in out_block.iter_mut() {
                *s *= gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fig6_table_values() {
        // 40 dB SPL curve
        assert_eq!(fig6_gain_40(10.0), 0.0);
        assert_eq!(fig6_gain_40(40.0), 20.0);
        assert!((fig6_gain_40(80.0) - 50.0).abs() < 1e-5);
        // 65 dB SPL curve
        assert_eq!(fig6_gain_65(10.0), 0.0);
        assert!((fig6_gain_65(40.0) - 12.0).abs() < 1e-5);
        assert!((fig6_gain_65(80.0) - 41.0).abs() < 1e-5);
        // 95 dB SPL curve
        assert_eq!(fig6_gain_95(30.0), 0.0);
        assert!((fig6_gain_95(80.0) - 0.1 * 40f32.powf(1.4)).abs() < 1e-4);
    }

    #[test]
    fn test_fig6_level_ordering() {
        // The fitter places 40/65/95 dB SPL on levels (1, 0, 2): level 0 is
        // the central curve.
        let mut sim = HearingAidSim::default_config(44_100, 512);
        let loss = vec![50.0; 7];
        sim.set_dynamic_eq_from_fig6(Ear::Left, &loss, 100.0).unwrap();
        let eq = sim.equalizer(Ear::Left).unwrap();
        assert!((eq.level_threshold(1) - (40.0 - 100.0)).abs() < 1e-5);
        assert!((eq.level_threshold(0) - (65.0 - 100.0)).abs() < 1e-5);
        assert!((eq.level_threshold(2) - (95.0 - 100.0)).abs() < 1e-5);
        assert!((eq.level_band_gain_db(1, 0) - fig6_gain_40(50.0)).abs() < 1e-5);
        assert!((eq.level_band_gain_db(0, 0) - fig6_gain_65(50.0)).abs() < 1e-5);
        assert!((eq.level_band_gain_db(2, 0) - fig6_gain_95(50.0)).abs() < 1e-5);
    }

    #[test]
    fn test_fig6_requires_matching_bands() {
        let mut sim = HearingAidSim::default_config(44_100, 512);
        assert!(sim
            .set_dynamic_eq_from_fig6(Ear::Both, &[40.0; 5], 100.0)
            .is_err());
    }

    #[test]
    fn test_quantizer_mid_tread() {
        // 2 bits: 4 levels across [-1, 1]
        let mut block = vec![-1.0, -0.6, -0.1, 0.0, 0.1, 0.6, 1.0];
        quantize(&mut block, 2);
        for s in &block {
            // Every output value sits on the 2/2^N grid
            let scaled = (s + 1.0) / 2.0 * 4.0;
            assert!((scaled - scaled.round()).abs() < 1e-5, "{s}");
        }
        // Clipping
        let mut over = vec![1.5, -1.5];
        quantize(&mut over, 8);
        assert!(over[0] <= 1.0 && over[1] >= -1.0);
    }

    #[test]
    fn test_normalization_offset_clamped_non_positive() {
        let mut sim = HearingAidSim::default_config(44_100, 512);
        let loss = vec![60.0; 7];
        sim.set_dynamic_eq_from_fig6(Ear::Left, &loss, 100.0).unwrap();
        // Level 0 max gain is fig6_gain_65(60) = 24 dB. Reference 10 dB
        // gives a -14 dB offset.
        sim.set_normalization(Ear::Left, true, 10.0);
        let eq = sim.equalizer(Ear::Left).unwrap();
        assert!((eq.overall_offset_db() + 14.0).abs() < 1e-4);
        // A reference above the max would boost: clamped to zero.
        sim.set_normalization(Ear::Left, true, 40.0);
        let eq = sim.equalizer(Ear::Left).unwrap();
        assert_eq!(eq.overall_offset_db(), 0.0);
    }

    #[test]
    fn test_disabled_is_identity() {
        let mut sim = HearingAidSim::default_config(44_100, 128);
        let input = EarPair::new(vec![0.25; 128], vec![-0.25; 128]);
        let mut output = EarPair::new(vec![0.0; 128], vec![0.0; 128]);
        sim.process(&input, &mut output);
        assert_eq!(input.left, output.left);
        assert_eq!(input.right, output.right);
    }
}
