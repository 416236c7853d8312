//! au-dsp: DSP primitives for the auralis binaural rendering toolkit
//!
//! - `fft` - frequency processor (forward/inverse FFT, complex products,
//!   module/phase conversions)
//! - `upc` - uniformly-partitioned convolution with frequency-delay lines
//! - `biquad` - second-order sections with crossfaded retuning
//! - `filter_chain` - serial chains, Butterworth splits, octave graphic EQ
//! - `delay` - fixed integer delay lines
//! - `noise` - band-limited Gaussian noise for the jitter simulator
//! - `dynamics` - envelope follower and downward expander

pub mod biquad;
pub mod delay;
pub mod dynamics;
pub mod fft;
pub mod filter_chain;
pub mod noise;
pub mod upc;

pub use biquad::{BiquadCoeffs, BiquadFilter, FilterType};
pub use delay::DelayLine;
pub use dynamics::{EnvelopeFollower, Expander};
pub use fft::FftProcessor;
pub use filter_chain::{FilterChain, GraphicEq, OCTAVE_BAND_COUNT};
pub use noise::NoiseGenerator;
pub use upc::{partition_ir, partition_ir_with, spectrum_len, PartitionedIr, Spectrum, UpcConvolver};

/// Every block processor can return to its initial state without
/// reallocating.
pub trait Processor {
    fn reset(&mut self);
}

impl Processor for UpcConvolver {
    fn reset(&mut self) {
        UpcConvolver::reset(self);
    }
}

impl Processor for BiquadFilter {
    fn reset(&mut self) {
        BiquadFilter::reset(self);
    }
}

impl Processor for FilterChain {
    fn reset(&mut self) {
        FilterChain::reset(self);
    }
}

impl Processor for GraphicEq {
    fn reset(&mut self) {
        GraphicEq::reset(self);
    }
}

impl Processor for DelayLine {
    fn reset(&mut self) {
        DelayLine::reset(self);
    }
}

impl Processor for Expander {
    fn reset(&mut self) {
        Expander::reset(self);
    }
}
