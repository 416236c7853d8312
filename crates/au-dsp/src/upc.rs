//! Uniformly-partitioned convolution
//!
//! A long FIR is split into equal subfilters of `block_size` taps, each held
//! as a zero-padded `2L`-point spectrum. Per block the convolver keeps a
//! frequency-delay line of the last N input spectra, multiplies each against
//! its subfilter and accumulates; the inverse transform's second half is the
//! output block. All buffers are sized at setup.

use au_core::{ResultId, Sample};

use crate::fft::{complex_multiply_accumulate, FftProcessor};

/// Frequency-domain representation of one subfilter or input block:
/// interleaved re/im, `len = 4 * block_size`.
pub type Spectrum = Vec<Sample>;

/// Partitioned impulse response: ordered subfilter spectra.
pub type PartitionedIr = Vec<Spectrum>;

/// Number of interleaved spectrum values per partition for a block size.
pub fn spectrum_len(block_size: usize) -> usize {
    4 * block_size
}

#[derive(Debug)]
pub struct UpcConvolver {
    block_size: usize,
    num_partitions: usize,
    /// Frequency-delay line, most recent block at `ring_pos`.
    ring: Vec<Spectrum>,
    ring_pos: usize,
    fft: FftProcessor,
    accumulator: Spectrum,
    /// Front-padded time block: zeros then input, so the second half of the
    /// inverse transform holds the valid overlap-save samples.
    padded: Vec<Sample>,
}

impl UpcConvolver {
    /// Pre-size for a block length and partition count. Setup-time only.
    pub fn new(block_size: usize, num_partitions: usize) -> Self {
        let slen = spectrum_len(block_size);
        Self {
            block_size,
            num_partitions,
            ring: vec![vec![0.0; slen]; num_partitions.max(1)],
            ring_pos: 0,
            fft: FftProcessor::new(2 * block_size),
            accumulator: vec![0.0; slen],
            padded: vec![0.0; 2 * block_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn reset(&mut self) {
        for slot in &mut self.ring {
            slot.fill(0.0);
        }
        self.ring_pos = 0;
        self.accumulator.fill(0.0);
    }

    /// Push the input block into the frequency-delay line and accumulate the
    /// product against each subfilter. Returns false (and zeroes nothing)
    /// when the sizes disagree; callers zero their output and report.
    fn accumulate(&mut self, input: &[Sample], partitions: &[Spectrum]) -> bool {
        if input.len() != self.block_size
            || partitions.len() != self.num_partitions
            || partitions
                .iter()
                .any(|p| p.len() != spectrum_len(self.block_size))
        {
            return false;
        }

        // New spectrum overwrites the oldest slot. The input sits in the
        // second half of the transform window.
        self.padded[..self.block_size].fill(0.0);
        self.padded[self.block_size..].copy_from_slice(input);
        self.ring_pos = (self.ring_pos + 1) % self.ring.len();
        let slot = &mut self.ring[self.ring_pos];
        self.fft.fft(&self.padded, slot);

        self.accumulator.fill(0.0);
        for (k, partition) in partitions.iter().enumerate() {
            let idx = (self.ring_pos + self.ring.len() - k) % self.ring.len();
            complex_multiply_accumulate(&self.ring[idx], partition, &mut self.accumulator);
        }
        true
    }

    /// Full convolution step: output block of `block_size` samples.
    pub fn process(&mut self, input: &[Sample], partitions: &[Spectrum], output: &mut [Sample]) {
        if output.len() != self.block_size || !self.accumulate(input, partitions) {
            output.fill(0.0);
            au_core::report!(
                ResultId::BadSize,
                "partitioned convolution input does not match the configured block/partition sizes",
                "feed blocks of the size given at setup"
            );
            return;
        }
        self.fft.ifft_second_half(&self.accumulator, output);
    }

    /// Convolution step that stays in the frequency domain. Several channels
    /// can be mixed spectrum-wise before a single inverse transform.
    pub fn process_without_ifft(
        &mut self,
        input: &[Sample],
        partitions: &[Spectrum],
        output_spectrum: &mut [Sample],
    ) {
        if output_spectrum.len() != spectrum_len(self.block_size)
            || !self.accumulate(input, partitions)
        {
            output_spectrum.fill(0.0);
            au_core::report!(
                ResultId::BadSize,
                "partitioned convolution input does not match the configured block/partition sizes",
                "feed blocks of the size given at setup"
            );
            return;
        }
        output_spectrum.copy_from_slice(&self.accumulator);
    }
}

/// Split a time-domain IR into partition spectra for this block size:
/// `ceil(len / L)` slices, each zero-padded to `2L` before the transform.
pub fn partition_ir(ir: &[Sample], block_size: usize) -> PartitionedIr {
    let mut fft = FftProcessor::new(2 * block_size);
    partition_ir_with(&mut fft, ir, block_size)
}

/// `partition_ir` against an existing `2 * block_size` transform plan.
/// Callers partitioning whole tables reuse one plan instead of re-planning
/// per entry.
pub fn partition_ir_with(
    fft: &mut FftProcessor,
    ir: &[Sample],
    block_size: usize,
) -> PartitionedIr {
    debug_assert_eq!(fft.len(), 2 * block_size);
    let num = ir.len().div_ceil(block_size).max(1);
    let mut partitions = Vec::with_capacity(num);
    for k in 0..num {
        let start = k * block_size;
        let end = (start + block_size).min(ir.len());
        let slice = if start < ir.len() { &ir[start..end] } else { &[] };
        let mut spectrum = vec![0.0; spectrum_len(block_size)];
        fft.fft(slice, &mut spectrum);
        partitions.push(spectrum);
    }
    partitions
}
