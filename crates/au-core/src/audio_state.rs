//! Per-process audio configuration

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_BLOCK_SIZE: usize = 512;

const SUPPORTED_SAMPLE_RATES: [u32; 3] = [44_100, 48_000, 96_000];

/// Sample rate and block size, fixed between resets. All buffers in a core
/// align to these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioState {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl AudioState {
    pub fn new(sample_rate: u32, block_size: usize) -> CoreResult<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(CoreError::InvalidParam(format!(
                "unsupported sample rate {sample_rate}"
            )));
        }
        if !block_size.is_power_of_two() || !(64..=4096).contains(&block_size) {
            return Err(CoreError::InvalidParam(format!(
                "block size {block_size} must be a power of two in 64..=4096"
            )));
        }
        Ok(Self {
            sample_rate,
            block_size,
        })
    }

    /// Duration of one block in seconds.
    pub fn block_duration(&self) -> f32 {
        self.block_size as f32 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_standard_rates() {
        for rate in [44_100, 48_000, 96_000] {
            assert!(AudioState::new(rate, 512).is_ok());
        }
    }

    #[test]
    fn test_rejects_bad_configs() {
        assert!(AudioState::new(22_050, 512).is_err());
        assert!(AudioState::new(44_100, 500).is_err());
        assert!(AudioState::new(44_100, 32).is_err());
    }
}
