//! au-hearing: hearing-loss and hearing-aid simulation
//!
//! - `multiband` - octave-banded expander filterbank
//! - `temporal` - temporal distortion (jitter) simulator
//! - `smearing` - frequency smearing (classic window / subframe matrix)
//! - `hearing_loss` - audiogram-driven simulator combining the three
//! - `dynamic_eq` - level-dependent multiband equalizer
//! - `hearing_aid` - dynamic EQ + Fig6 fitting + quantization + shaping

pub mod dynamic_eq;
pub mod hearing_aid;
pub mod hearing_loss;
pub mod multiband;
pub mod smearing;
pub mod temporal;

pub use dynamic_eq::DynamicEqualizer;
pub use hearing_aid::HearingAidSim;
pub use hearing_loss::HearingLossSim;
pub use multiband::MultibandExpander;
pub use smearing::{FrequencySmearing, SmearingAlgorithm};
pub use temporal::TemporalDistortionSimulator;
