//! Hearing-loss simulator
//!
//! Per ear: temporal distortion, then frequency smearing, then the
//! audiogram-driven multiband expander. Each stage is independently
//! bypassable; the smearing stage keeps a matched delay on a bypassed ear so
//! the two ears stay time-aligned.

use au_core::{Ear, EarPair, Sample};
use au_dsp::DelayLine;

use crate::multiband::{FilterParams, MultibandExpander, OCTAVE_BAND_COUNT};
use crate::smearing::{FrequencySmearing, SmearingAlgorithm};
use crate::temporal::TemporalDistortionSimulator;

/// Threshold in dB SPL of a 100 dB HL tone.
pub const T100: f32 = 100.0;
/// Attenuation in dB applied at 100 dB HL.
pub const A100: f32 = 60.0;

/// Ratio applied when the expander denominator collapses (total loss).
const MAX_EXPANDER_RATIO: f32 = 1000.0;

pub const DEFAULT_CALIBRATION_DBSPL_FOR_0_DBFS: f32 = 100.0;

/// Expander threshold in dB SPL for a hearing level.
pub fn threshold_dbspl_from_dbhl(dbhl: f32) -> f32 {
    let limited = dbhl.min(120.0);
    T100 - A100 + A100 * limited * 0.01
}

/// Expansion ratio for a hearing level.
pub fn ratio_from_dbhl(dbhl: f32) -> f32 {
    let limited = dbhl.min(100.0);
    let denominator = T100 - A100 + (A100 - T100) * limited * 0.01;
    if denominator.abs() < 1e-7 {
        MAX_EXPANDER_RATIO
    } else {
        (T100 - A100) / denominator
    }
}

/// Linear attenuation in dB for a hearing level.
pub fn attenuation_db_from_dbhl(dbhl: f32) -> f32 {
    A100 * dbhl * 0.01
}

pub struct HearingLossSim {
    calibration_dbspl_for_0_dbfs: f32,
    audiograms: EarPair<[f32; OCTAVE_BAND_COUNT]>,
    expanders: EarPair<MultibandExpander>,
    temporal: TemporalDistortionSimulator,
    smearing: EarPair<FrequencySmearing>,
    smearing_bypass_delay: EarPair<DelayLine>,
    enable_simulation: EarPair<bool>,
    enable_expander: EarPair<bool>,
    enable_smearing: EarPair<bool>,
    // Stage buffers, sized at setup
    stage_a: EarPair<Vec<Sample>>,
    stage_b: EarPair<Vec<Sample>>,
}

impl std::fmt::Debug for HearingLossSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HearingLossSim")
            .field("calibration", &self.calibration_dbspl_for_0_dbfs)
            .finish()
    }
}

impl HearingLossSim {
    pub fn new(
        sample_rate: u32,
        block_size: usize,
        calibration_dbspl_for_0_dbfs: f32,
        filters_per_band: usize,
    ) -> Self {
        let make_expander =
            || MultibandExpander::new(sample_rate as f32, block_size, filters_per_band);
        let make_smearing =
            || FrequencySmearing::new(block_size, sample_rate as f32, SmearingAlgorithm::Subframe);
        Self {
            calibration_dbspl_for_0_dbfs,
            audiograms: EarPair::new([0.0; OCTAVE_BAND_COUNT], [0.0; OCTAVE_BAND_COUNT]),
            expanders: EarPair::new(make_expander(), make_expander()),
            temporal: TemporalDistortionSimulator::new(sample_rate, block_size),
            smearing: EarPair::new(make_smearing(), make_smearing()),
            smearing_bypass_delay: EarPair::new(
                DelayLine::new(block_size),
                DelayLine::new(block_size),
            ),
            enable_simulation: EarPair::new(true, true),
            enable_expander: EarPair::new(true, true),
            enable_smearing: EarPair::new(false, false),
            stage_a: EarPair::new(vec![0.0; block_size], vec![0.0; block_size]),
            stage_b: EarPair::new(vec![0.0; block_size], vec![0.0; block_size]),
        }
    }

    pub fn set_calibration(&mut self, dbspl_for_0_dbfs: f32) {
        self.calibration_dbspl_for_0_dbfs = dbspl_for_0_dbfs;
        let left = self.audiograms.left;
        let right = self.audiograms.right;
        self.apply_audiogram(Ear::Left, &left);
        self.apply_audiogram(Ear::Right, &right);
    }

    pub fn set_enabled(&mut self, ear: Ear, enabled: bool) {
        self.enable_simulation.for_each_selected(ear, |e| *e = enabled);
    }

    pub fn set_expander_enabled(&mut self, ear: Ear, enabled: bool) {
        self.enable_expander.for_each_selected(ear, |e| *e = enabled);
    }

    pub fn set_smearing_enabled(&mut self, ear: Ear, enabled: bool) {
        self.enable_smearing.for_each_selected(ear, |e| *e = enabled);
    }

    pub fn temporal_distortion(&mut self) -> &mut TemporalDistortionSimulator {
        &mut self.temporal
    }

    pub fn smearing(&mut self, ear: Ear) -> Option<&mut FrequencySmearing> {
        self.smearing.get_mut(ear)
    }

    pub fn hearing_level_dbhl(&self, ear: Ear, band: usize) -> f32 {
        self.audiograms.get(ear).map(|a| a[band]).unwrap_or(0.0)
    }

    /// Set a whole audiogram (dB HL per octave band).
    pub fn set_audiogram(&mut self, ear: Ear, dbhl: [f32; OCTAVE_BAND_COUNT]) {
        self.audiograms.for_each_selected(ear, |a| *a = dbhl);
        self.apply_audiogram(ear, &dbhl);
        log::debug!("audiogram applied to {ear:?}: {dbhl:?} dB HL");
    }

    pub fn set_hearing_level(&mut self, ear: Ear, band: usize, dbhl: f32) {
        self.audiograms.for_each_selected(ear, |a| a[band] = dbhl);
        let left = self.audiograms.left;
        let right = self.audiograms.right;
        match ear {
            Ear::Left => self.apply_audiogram(Ear::Left, &left),
            Ear::Right => self.apply_audiogram(Ear::Right, &right),
            Ear::Both => {
                self.apply_audiogram(Ear::Left, &left);
                self.apply_audiogram(Ear::Right, &right);
            }
            Ear::None => {}
        }
    }

    pub fn set_attack_release(&mut self, ear: Ear, attack_ms: f32, release_ms: f32) {
        self.expanders
            .for_each_selected(ear, |e| e.set_attack_all(attack_ms, release_ms));
    }

    /// Push audiogram-derived parameters into every filter of an ear's bank:
    /// threshold, ratio, and attenuation, interpolated at each filter's
    /// frequency from the adjacent octave bands.
    fn apply_audiogram(&mut self, ear: Ear, dbhl: &[f32; OCTAVE_BAND_COUNT]) {
        let calibration = self.calibration_dbspl_for_0_dbfs;
        self.expanders.for_each_selected(ear, |expander| {
            for band in 0..OCTAVE_BAND_COUNT {
                expander.set_band_attenuation_db(band, attenuation_db_from_dbhl(dbhl[band]));
            }
            for index in 0..expander.num_filters() {
                let frequency = expander.filter_frequency(index);
                let dbhl_here = MultibandExpander::interpolate_at(frequency, dbhl);
                expander.set_filter_params(
                    index,
                    FilterParams {
                        threshold_dbfs: threshold_dbspl_from_dbhl(dbhl_here) - calibration,
                        ratio: ratio_from_dbhl(dbhl_here),
                        attenuation_db: attenuation_db_from_dbhl(dbhl_here),
                    },
                );
            }
        });
    }

    pub fn process(&mut self, input: &EarPair<Vec<Sample>>, output: &mut EarPair<Vec<Sample>>) {
        if !self.enable_simulation.left && !self.enable_simulation.right {
            output.left.copy_from_slice(&input.left);
            output.right.copy_from_slice(&input.right);
            return;
        }

        // 1. Temporal distortion (handles its own per-ear bypass)
        self.temporal.process(input, &mut self.stage_a);

        // 2. Frequency smearing; a bypassed ear gets a matched block delay
        // so both ears keep the same latency when only one ear smears.
        let smear_left = self.enable_smearing.left && self.enable_simulation.left;
        let smear_right = self.enable_smearing.right && self.enable_simulation.right;
        if smear_left {
            self.smearing
                .left
                .process(&self.stage_a.left, &mut self.stage_b.left);
        } else if smear_right {
            self.smearing_bypass_delay
                .left
                .process(&self.stage_a.left, &mut self.stage_b.left);
        } else {
            self.stage_b.left.copy_from_slice(&self.stage_a.left);
        }
        if smear_right {
            self.smearing
                .right
                .process(&self.stage_a.right, &mut self.stage_b.right);
        } else if smear_left {
            self.smearing_bypass_delay
                .right
                .process(&self.stage_a.right, &mut self.stage_b.right);
        } else {
            self.stage_b.right.copy_from_slice(&self.stage_a.right);
        }

        // 3. Audiogram: multiband expansion and attenuation
        if self.enable_expander.left
            && self.enable_simulation.left
            && self.expanders.left.is_ready()
        {
            self.expanders
                .left
                .process(&self.stage_b.left, &mut output.left);
        } else {
            output.left.copy_from_slice(&self.stage_b.left);
        }
        if self.enable_expander.right
            && self.enable_simulation.right
            && self.expanders.right.is_ready()
        {
            self.expanders
                .right
                .process(&self.stage_b.right, &mut output.right);
        } else {
            output.right.copy_from_slice(&self.stage_b.right);
        }
    }
}
