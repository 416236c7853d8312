//! Frequency smearing
//!
//! Two algorithms for simulating broadened auditory filters:
//!
//! * **Classic**: overlap-add over doubled Hann blocks; the magnitude
//!   spectrum is convolved with a separable smearing window built from a
//!   downward and an upward Gaussian, normalized to unit area.
//! * **Subframe**: four Hann sub-blocks per block with a quarter-block hop;
//!   each sub-block's power spectrum is multiplied by a precomputed
//!   smearing matrix derived from an ERB auditory filterbank widened by the
//!   broadening factors, solving `A_ext * X = B` in the least-squares sense.
//!
//! Both algorithms have one block of latency. Periodic Hann windows keep the
//! overlap-add an exact partition of unity, so disabled smearing (zero
//! smearing width, broadening factors of 1) passes the signal through
//! unchanged.

use std::sync::Arc;

use nalgebra::DMatrix;
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use au_core::Sample;

const INVERSE_SQRT_2PI: f32 = 0.398_942_28;
const SMEARING_THRESHOLD: f32 = 1e-7;
const MIN_BROADENING_FACTOR: f32 = 1.0;

pub const DEFAULT_SMEARING_SECTION_BINS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmearingAlgorithm {
    Classic,
    Subframe,
}

pub struct FrequencySmearing {
    algorithm: SmearingAlgorithm,
    buffer_size: usize,
    sample_rate: f32,

    // Classic parameters
    downward_smearing_hz: f32,
    upward_smearing_hz: f32,
    downward_section_bins: usize,
    upward_section_bins: usize,
    smearing_window: Vec<f32>,

    // Subframe parameters
    downward_broadening: f32,
    upward_broadening: f32,
    /// None when both broadening factors are 1: the solve degenerates to the
    /// identity and smearing is a pass-through.
    smearing_matrix: Option<DMatrix<f64>>,

    hann_window: Vec<f32>,
    previous_buffer: Vec<Sample>,
    /// Classic overlap-add carry.
    storage_buffer: Vec<Sample>,
    /// Subframe: processed sub-blocks 1..3 of the previous call.
    storage_last: [Vec<Sample>; 3],

    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    // Work buffers sized at setup
    time_scratch: Vec<f32>,
    spectrum_scratch: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    module: Vec<f32>,
    phase: Vec<f32>,
    smeared: Vec<f32>,
}

impl std::fmt::Debug for FrequencySmearing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencySmearing")
            .field("algorithm", &self.algorithm)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

impl FrequencySmearing {
    pub fn new(buffer_size: usize, sample_rate: f32, algorithm: SmearingAlgorithm) -> Self {
        let fft_len = match algorithm {
            SmearingAlgorithm::Classic => 2 * buffer_size,
            SmearingAlgorithm::Subframe => buffer_size,
        };
        let bins = fft_len / 2 + 1;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);
        let scratch_len = forward.get_scratch_len().max(inverse.get_scratch_len());

        let mut s = Self {
            algorithm,
            buffer_size,
            sample_rate,
            downward_smearing_hz: 0.0,
            upward_smearing_hz: 0.0,
            downward_section_bins: DEFAULT_SMEARING_SECTION_BINS,
            upward_section_bins: DEFAULT_SMEARING_SECTION_BINS,
            smearing_window: Vec::new(),
            downward_broadening: 1.0,
            upward_broadening: 1.0,
            smearing_matrix: None,
            hann_window: vec![0.0; fft_len],
            previous_buffer: vec![0.0; buffer_size],
            storage_buffer: vec![0.0; buffer_size],
            storage_last: [
                vec![0.0; buffer_size],
                vec![0.0; buffer_size],
                vec![0.0; buffer_size],
            ],
            forward,
            inverse,
            time_scratch: vec![0.0; fft_len],
            spectrum_scratch: vec![Complex32::new(0.0, 0.0); bins],
            fft_scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
            module: vec![0.0; bins],
            phase: vec![0.0; bins],
            smeared: vec![0.0; bins],
        };
        s.setup_smearing_function();
        s
    }

    pub fn algorithm(&self) -> SmearingAlgorithm {
        self.algorithm
    }

    fn setup_smearing_function(&mut self) {
        // Periodic Hann: the shifted window sums are exactly constant.
        let n = self.hann_window.len();
        let power_factor = match self.algorithm {
            SmearingAlgorithm::Subframe => 1.0 / 1.5f32.sqrt(),
            SmearingAlgorithm::Classic => 1.0,
        };
        for (i, w) in self.hann_window.iter_mut().enumerate() {
            let t = std::f32::consts::TAU * i as f32 / n as f32;
            *w = 0.5 * (1.0 - t.cos()) * power_factor;
        }
        match self.algorithm {
            SmearingAlgorithm::Classic => self.calculate_smearing_window(),
            SmearingAlgorithm::Subframe => self.calculate_smearing_matrix(),
        }
    }

    // ---- Classic parameters -------------------------------------------------

    pub fn set_downward_smearing_hz(&mut self, hz: f32) {
        if self.algorithm != SmearingAlgorithm::Classic {
            return;
        }
        self.downward_smearing_hz = hz.max(0.0);
        self.calculate_smearing_window();
    }

    pub fn set_upward_smearing_hz(&mut self, hz: f32) {
        if self.algorithm != SmearingAlgorithm::Classic {
            return;
        }
        self.upward_smearing_hz = hz.max(0.0);
        self.calculate_smearing_window();
    }

    pub fn set_downward_section_bins(&mut self, bins: usize) {
        if self.algorithm != SmearingAlgorithm::Classic {
            return;
        }
        self.downward_section_bins = bins.max(1);
        self.calculate_smearing_window();
    }

    pub fn set_upward_section_bins(&mut self, bins: usize) {
        if self.algorithm != SmearingAlgorithm::Classic {
            return;
        }
        self.upward_section_bins = bins.max(1);
        self.calculate_smearing_window();
    }

    pub fn smearing_window(&self) -> &[f32] {
        &self.smearing_window
    }

    // ---- Subframe parameters ------------------------------------------------

    pub fn set_downward_broadening_factor(&mut self, factor: f32) {
        if self.algorithm != SmearingAlgorithm::Subframe {
            return;
        }
        self.downward_broadening = factor.max(MIN_BROADENING_FACTOR);
        self.calculate_smearing_matrix();
    }

    pub fn set_upward_broadening_factor(&mut self, factor: f32) {
        if self.algorithm != SmearingAlgorithm::Subframe {
            return;
        }
        self.upward_broadening = factor.max(MIN_BROADENING_FACTOR);
        self.calculate_smearing_matrix();
    }

    /// True when the subframe matrix collapsed to the identity.
    pub fn is_identity_matrix(&self) -> bool {
        self.smearing_matrix.is_none()
    }

    // ---- Window construction (classic) -------------------------------------

    fn gaussian(deviation: f32, value: f32) -> f32 {
        if deviation.abs() < SMEARING_THRESHOLD {
            return if value == 0.0 { 1.0 } else { 0.0 };
        }
        let z = value / deviation;
        deviation * INVERSE_SQRT_2PI * (-0.5 * z * z).exp()
    }

    fn calculate_smearing_window(&mut self) {
        let down = self.downward_section_bins;
        let up = self.upward_section_bins;

        // No smearing at all: a unit impulse.
        if self.downward_smearing_hz < SMEARING_THRESHOLD
            && self.upward_smearing_hz < SMEARING_THRESHOLD
        {
            self.smearing_window = vec![0.0; down + up];
            self.smearing_window[down] = 1.0;
            return;
        }

        let bin_hz = self.sample_rate / (2.0 * self.buffer_size as f32);

        let mut window = Vec::with_capacity(down + up);
        let mut total_area = 0.0f32;
        for i in (0..down).rev() {
            let v = Self::gaussian(self.downward_smearing_hz, i as f32 * bin_hz);
            window.push(v);
            total_area += v;
        }
        let value_at_mean = window[down - 1];

        let mut upward = Vec::with_capacity(up);
        let mut upward_area = 0.0f32;
        for i in 0..up {
            let v = Self::gaussian(self.upward_smearing_hz, i as f32 * bin_hz);
            upward.push(v);
            upward_area += v;
        }
        // Stitch the upward branch to the downward peak value.
        let scale = if upward[0].abs() > SMEARING_THRESHOLD {
            value_at_mean / upward[0]
        } else {
            0.0
        };
        total_area += upward_area * scale;
        for v in &mut upward {
            *v *= scale;
        }
        window.extend_from_slice(&upward);

        if total_area > SMEARING_THRESHOLD {
            let inverse_area = 1.0 / total_area;
            for v in &mut window {
                *v *= inverse_area;
            }
        }
        self.smearing_window = window;
    }

    // ---- Matrix construction (subframe) -------------------------------------

    /// ERB auditory filterbank as a square matrix: row i is the filter
    /// centred on bin i, evaluated at every bin.
    fn auditory_filter_matrix(&self, lower_broadening: f64, upper_broadening: f64) -> DMatrix<f64> {
        let n = self.buffer_size;
        let mut m = DMatrix::zeros(n, n);
        // Bin 0 has no bandwidth; its value avoids the division by zero.
        m[(0, 0)] = 1.0 / ((lower_broadening + upper_broadening) / 2.0);
        for i in 1..n {
            let fhz = i as f64 * self.sample_rate as f64 / (2.0 * n as f64);
            let erbhz = 24.7 * (fhz * 0.00437 + 1.0);
            let pl = 4.0 * fhz / (erbhz * lower_broadening);
            let pu = 4.0 * fhz / (erbhz * upper_broadening);
            let erb_norm = erbhz * (lower_broadening + upper_broadening) / 49.4;
            for j in 0..n {
                let g = (i as f64 - j as f64).abs() / i as f64;
                let p = if j < i { pl } else { pu };
                m[(i, j)] = (1.0 + p * g) * (-p * g).exp() / erb_norm;
            }
        }
        m
    }

    /// Append `n/2` columns and wrap the upper tails of the widest filters
    /// into them, so the least-squares system sees the full filter shapes.
    fn extend_matrix(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let n = input.nrows();
        let mut extended = DMatrix::zeros(n, 3 * n / 2);
        extended.view_mut((0, 0), (n, n)).copy_from(input);
        for i in n / 2..n {
            let wrap = (2 * i + 1).saturating_sub(n).min(n / 2);
            for j in 0..wrap {
                extended[(i, n + j)] = input[(i, 2 * i - n - j)];
            }
        }
        extended
    }

    fn calculate_smearing_matrix(&mut self) {
        if (self.downward_broadening - 1.0).abs() < SMEARING_THRESHOLD
            && (self.upward_broadening - 1.0).abs() < SMEARING_THRESHOLD
        {
            // Widened == reference: X = I solves the system exactly.
            self.smearing_matrix = None;
            return;
        }

        let reference = self.auditory_filter_matrix(1.0, 1.0);
        let widened = self.auditory_filter_matrix(
            self.downward_broadening as f64,
            self.upward_broadening as f64,
        );
        let extended = self.extend_matrix(&reference);

        let svd = extended.svd(true, true);
        let solution = svd
            .solve(&widened, 1e-10)
            .unwrap_or_else(|_| DMatrix::identity(3 * self.buffer_size / 2, self.buffer_size));

        // Keep the square part addressed by the spectrum bins.
        let n = self.buffer_size;
        let mut matrix = DMatrix::zeros(n, n);
        matrix
            .view_mut((0, 0), (n, n))
            .copy_from(&solution.view((0, 0), (n, n)));
        self.smearing_matrix = Some(matrix);
    }

    // ---- Spectrum smearing ---------------------------------------------------

    /// Convolve the half-spectrum magnitude with the smearing window.
    fn smear_with_window(&mut self, bins: usize) {
        let down = self.downward_section_bins;
        for n in 0..bins {
            let mut acc = 0.0f32;
            for (m, value) in self.module[..bins].iter().enumerate() {
                let w = n as isize - m as isize + down as isize;
                if w >= 0 && (w as usize) < self.smearing_window.len() {
                    acc += value * self.smearing_window[w as usize];
                }
            }
            self.smeared[n] = acc;
        }
    }

    /// Multiply the power half-spectrum by the smearing matrix, back to
    /// magnitude via the square root.
    fn smear_with_matrix(&mut self, bins: usize) {
        match &self.smearing_matrix {
            None => {
                for n in 0..bins {
                    let v = self.module[n].max(0.0).sqrt();
                    self.smeared[n] = if v.is_finite() { v } else { 0.0 };
                }
            }
            Some(matrix) => {
                for n in 0..bins {
                    let mut acc = 0.0f64;
                    for m in 0..bins {
                        acc += self.module[m] as f64 * matrix[(n, m)];
                    }
                    let v = acc.max(0.0).sqrt() as f32;
                    self.smeared[n] = if v.is_finite() { v } else { 0.0 };
                }
            }
        }
    }

    // ---- Block processing ----------------------------------------------------

    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert_eq!(input.len(), self.buffer_size);
        debug_assert_eq!(output.len(), self.buffer_size);
        match self.algorithm {
            SmearingAlgorithm::Classic => self.process_classic(input, output),
            SmearingAlgorithm::Subframe => self.process_subframe(input, output),
        }
    }

    fn process_classic(&mut self, input: &[Sample], output: &mut [Sample]) {
        let l = self.buffer_size;
        let fft_len = 2 * l;
        let bins = fft_len / 2 + 1;

        // Doubled block: previous input followed by the current one, windowed.
        for i in 0..l {
            self.time_scratch[i] = self.previous_buffer[i] * self.hann_window[i];
            self.time_scratch[l + i] = input[i] * self.hann_window[l + i];
        }
        let _ = self.forward.process_with_scratch(
            &mut self.time_scratch,
            &mut self.spectrum_scratch,
            &mut self.fft_scratch,
        );

        for (i, c) in self.spectrum_scratch[..bins].iter().enumerate() {
            self.module[i] = c.norm();
            self.phase[i] = c.im.atan2(c.re);
        }
        self.smear_with_window(bins);
        for i in 0..bins {
            self.spectrum_scratch[i] =
                Complex32::from_polar(self.smeared[i], self.phase[i]);
        }
        // The inverse real transform requires purely real DC and Nyquist bins.
        self.spectrum_scratch[0] = Complex32::new(self.spectrum_scratch[0].re, 0.0);
        self.spectrum_scratch[bins - 1] = Complex32::new(self.spectrum_scratch[bins - 1].re, 0.0);

        let _ = self.inverse.process_with_scratch(
            &mut self.spectrum_scratch,
            &mut self.time_scratch,
            &mut self.fft_scratch,
        );
        let norm = 1.0 / fft_len as f32;

        // Overlap-add: first half plus the previous carry; keep the tail.
        for i in 0..l {
            output[i] = self.time_scratch[i] * norm + self.storage_buffer[i];
        }
        for i in 0..l {
            self.storage_buffer[i] = self.time_scratch[l + i] * norm;
        }
        self.previous_buffer.copy_from_slice(input);
    }

    fn process_subframe(&mut self, input: &[Sample], output: &mut [Sample]) {
        let l = self.buffer_size;
        let shift = l / 4;
        let bins = l / 2 + 1;

        let mut processed: [Vec<Sample>; 4] = [
            vec![0.0; l],
            vec![0.0; l],
            vec![0.0; l],
            vec![0.0; l],
        ];

        for (sub, processed_sub) in processed.iter_mut().enumerate() {
            // Sub-block window over [previous | current] at a quarter hop.
            for i in 0..l {
                let j = sub * shift + i;
                let sample = if j < l {
                    self.previous_buffer[j]
                } else {
                    input[j - l]
                };
                self.time_scratch[i] = sample * self.hann_window[i];
            }
            let _ = self.forward.process_with_scratch(
                &mut self.time_scratch,
                &mut self.spectrum_scratch,
                &mut self.fft_scratch,
            );

            for (i, c) in self.spectrum_scratch[..bins].iter().enumerate() {
                self.module[i] = c.norm_sqr();
                self.phase[i] = c.im.atan2(c.re);
            }
            self.smear_with_matrix(bins);
            for i in 0..bins {
                self.spectrum_scratch[i] =
                    Complex32::from_polar(self.smeared[i], self.phase[i]);
            }
            self.spectrum_scratch[0] = Complex32::new(self.spectrum_scratch[0].re, 0.0);
            self.spectrum_scratch[bins - 1] =
                Complex32::new(self.spectrum_scratch[bins - 1].re, 0.0);

            let _ = self.inverse.process_with_scratch(
                &mut self.spectrum_scratch,
                &mut self.time_scratch,
                &mut self.fft_scratch,
            );
            let norm = 1.0 / l as f32;
            for i in 0..l {
                processed_sub[i] = self.time_scratch[i] * norm * self.hann_window[i];
            }
        }

        // Each output quarter sums the four sub-blocks that overlap it,
        // three of which may come from the previous call.
        for j in 0..shift {
            output[j] = self.storage_last[0][shift * 3 + j]
                + self.storage_last[1][shift * 2 + j]
                + self.storage_last[2][shift + j]
                + processed[0][j];
            output[shift + j] = self.storage_last[1][shift * 3 + j]
                + self.storage_last[2][shift * 2 + j]
                + processed[0][shift + j]
                + processed[1][j];
            output[shift * 2 + j] = self.storage_last[2][shift * 3 + j]
                + processed[0][shift * 2 + j]
                + processed[1][shift + j]
                + processed[2][j];
            output[shift * 3 + j] = processed[0][shift * 3 + j]
                + processed[1][shift * 2 + j]
                + processed[2][shift + j]
                + processed[3][j];
        }

        self.previous_buffer.copy_from_slice(input);
        let [_, p1, p2, p3] = processed;
        self.storage_last = [p1, p2, p3];
    }

    pub fn reset(&mut self) {
        self.previous_buffer.fill(0.0);
        self.storage_buffer.fill(0.0);
        for s in &mut self.storage_last {
            s.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_block(block: usize, offset: usize, freq: f32, rate: f32) -> Vec<f32> {
        (0..block)
            .map(|i| (std::f32::consts::TAU * freq * (offset + i) as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_classic_no_smearing_is_delayed_identity() {
        let l = 256;
        let mut s = FrequencySmearing::new(l, 44_100.0, SmearingAlgorithm::Classic);
        let mut output = vec![0.0; l];
        let mut previous = vec![0.0; l];
        for b in 0..6 {
            let input = sine_block(l, b * l, 997.0, 44_100.0);
            s.process(&input, &mut output);
            if b > 0 {
                for (o, p) in output.iter().zip(previous.iter()) {
                    assert!((o - p).abs() < 1e-4, "{o} vs {p}");
                }
            }
            previous = input;
        }
    }

    #[test]
    fn test_subframe_identity_matrix_at_unit_broadening() {
        let s = FrequencySmearing::new(128, 44_100.0, SmearingAlgorithm::Subframe);
        assert!(s.is_identity_matrix());
    }

    #[test]
    fn test_subframe_unit_broadening_is_delayed_identity() {
        let l = 128;
        let mut s = FrequencySmearing::new(l, 44_100.0, SmearingAlgorithm::Subframe);
        let mut output = vec![0.0; l];
        let mut previous = vec![0.0; l];
        for b in 0..6 {
            let input = sine_block(l, b * l, 1500.0, 44_100.0);
            s.process(&input, &mut output);
            if b > 1 {
                for (o, p) in output.iter().zip(previous.iter()) {
                    assert!((o - p).abs() < 1e-3, "block {b}: {o} vs {p}");
                }
            }
            previous = input;
        }
    }

    #[test]
    fn test_classic_window_area_is_one() {
        let mut s = FrequencySmearing::new(256, 44_100.0, SmearingAlgorithm::Classic);
        s.set_downward_smearing_hz(200.0);
        s.set_upward_smearing_hz(500.0);
        let area: f32 = s.smearing_window().iter().sum();
        assert!((area - 1.0).abs() < 1e-3, "area {area}");
    }

    #[test]
    fn test_classic_smearing_spreads_spectrum() {
        let l = 256;
        let mut s = FrequencySmearing::new(l, 44_100.0, SmearingAlgorithm::Classic);
        s.set_downward_smearing_hz(400.0);
        s.set_upward_smearing_hz(400.0);

        let mut clean = FrequencySmearing::new(l, 44_100.0, SmearingAlgorithm::Classic);

        let mut smeared_out = vec![0.0; l];
        let mut clean_out = vec![0.0; l];
        let mut diff = 0.0f32;
        for b in 0..8 {
            let input = sine_block(l, b * l, 2000.0, 44_100.0);
            s.process(&input, &mut smeared_out);
            clean.process(&input, &mut clean_out);
            if b > 2 {
                diff += smeared_out
                    .iter()
                    .zip(clean_out.iter())
                    .map(|(a, c)| (a - c).abs())
                    .sum::<f32>();
            }
        }
        assert!(diff > 0.5, "smearing changed nothing: {diff}");
    }

    #[test]
    fn test_subframe_broadening_builds_nonidentity_matrix() {
        let mut s = FrequencySmearing::new(64, 44_100.0, SmearingAlgorithm::Subframe);
        s.set_downward_broadening_factor(2.0);
        s.set_upward_broadening_factor(2.0);
        assert!(!s.is_identity_matrix());
    }

    #[test]
    fn test_classic_setters_ignored_by_subframe() {
        let mut s = FrequencySmearing::new(64, 44_100.0, SmearingAlgorithm::Subframe);
        s.set_downward_smearing_hz(100.0);
        assert!(s.is_identity_matrix());
    }
}
