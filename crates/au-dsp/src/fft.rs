//! Frequency processor: FFT, complex products, module/phase conversions
//!
//! Spectra are stored as flat interleaved re/im buffers (`len = 2 * fft_len`),
//! the layout expected by the partitioned convolver and the HRIR tables.

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use au_core::Sample;

/// Forward/inverse transforms of a fixed length with pre-allocated scratch.
pub struct FftProcessor {
    len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    work: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftProcessor").field("len", &self.len).finish()
    }
}

impl FftProcessor {
    /// Plan transforms of `len` points. Setup-time only.
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            len,
            forward,
            inverse,
            work: vec![Complex32::new(0.0, 0.0); len],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forward transform of a real block, zero-padded to the plan length.
    /// `spectrum` must hold `2 * len` interleaved values.
    pub fn fft(&mut self, time: &[Sample], spectrum: &mut [Sample]) {
        debug_assert!(time.len() <= self.len);
        debug_assert_eq!(spectrum.len(), 2 * self.len);
        for (w, s) in self.work.iter_mut().zip(time.iter()) {
            *w = Complex32::new(*s, 0.0);
        }
        for w in self.work.iter_mut().skip(time.len()) {
            *w = Complex32::new(0.0, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.work, &mut self.scratch);
        for (i, w) in self.work.iter().enumerate() {
            spectrum[2 * i] = w.re;
            spectrum[2 * i + 1] = w.im;
        }
    }

    /// Inverse transform, real part scaled by 1/N. `time` holds `len` samples.
    pub fn ifft(&mut self, spectrum: &[Sample], time: &mut [Sample]) {
        debug_assert_eq!(spectrum.len(), 2 * self.len);
        debug_assert_eq!(time.len(), self.len);
        for (i, w) in self.work.iter_mut().enumerate() {
            *w = Complex32::new(spectrum[2 * i], spectrum[2 * i + 1]);
        }
        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);
        let norm = 1.0 / self.len as f32;
        for (t, w) in time.iter_mut().zip(self.work.iter()) {
            *t = w.re * norm;
        }
    }

    /// Inverse transform keeping only the last half of the real output,
    /// the valid samples of an overlap-save block. `time` holds `len / 2`.
    pub fn ifft_second_half(&mut self, spectrum: &[Sample], time: &mut [Sample]) {
        debug_assert_eq!(spectrum.len(), 2 * self.len);
        debug_assert_eq!(time.len(), self.len / 2);
        for (i, w) in self.work.iter_mut().enumerate() {
            *w = Complex32::new(spectrum[2 * i], spectrum[2 * i + 1]);
        }
        self.inverse
            .process_with_scratch(&mut self.work, &mut self.scratch);
        let norm = 1.0 / self.len as f32;
        let half = self.len / 2;
        for (t, w) in time.iter_mut().zip(self.work[half..].iter()) {
            *t = w.re * norm;
        }
    }
}

/// Pointwise complex product of interleaved spectra: `out = a * b`.
pub fn complex_multiply(a: &[Sample], b: &[Sample], out: &mut [Sample]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    for i in (0..a.len()).step_by(2) {
        let (ar, ai) = (a[i], a[i + 1]);
        let (br, bi) = (b[i], b[i + 1]);
        out[i] = ar * br - ai * bi;
        out[i + 1] = ar * bi + ai * br;
    }
}

/// Pointwise complex multiply-accumulate: `acc += a * b`.
pub fn complex_multiply_accumulate(a: &[Sample], b: &[Sample], acc: &mut [Sample]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), acc.len());
    for i in (0..a.len()).step_by(2) {
        let (ar, ai) = (a[i], a[i + 1]);
        let (br, bi) = (b[i], b[i + 1]);
        acc[i] += ar * br - ai * bi;
        acc[i + 1] += ar * bi + ai * br;
    }
}

/// Split an interleaved spectrum into magnitude and phase.
pub fn to_module_phase(spectrum: &[Sample], module: &mut [Sample], phase: &mut [Sample]) {
    debug_assert_eq!(spectrum.len(), 2 * module.len());
    debug_assert_eq!(module.len(), phase.len());
    for i in 0..module.len() {
        let (re, im) = (spectrum[2 * i], spectrum[2 * i + 1]);
        module[i] = (re * re + im * im).sqrt();
        phase[i] = im.atan2(re);
    }
}

/// Split an interleaved spectrum into power (magnitude squared) and phase.
pub fn to_power_phase(spectrum: &[Sample], power: &mut [Sample], phase: &mut [Sample]) {
    debug_assert_eq!(spectrum.len(), 2 * power.len());
    debug_assert_eq!(power.len(), phase.len());
    for i in 0..power.len() {
        let (re, im) = (spectrum[2 * i], spectrum[2 * i + 1]);
        power[i] = re * re + im * im;
        phase[i] = im.atan2(re);
    }
}

/// Recombine magnitude and phase into an interleaved spectrum.
pub fn to_real_imaginary(module: &[Sample], phase: &[Sample], spectrum: &mut [Sample]) {
    debug_assert_eq!(module.len(), phase.len());
    debug_assert_eq!(spectrum.len(), 2 * module.len());
    for i in 0..module.len() {
        spectrum[2 * i] = module[i] * phase[i].cos();
        spectrum[2 * i + 1] = module[i] * phase[i].sin();
    }
}
