//! Physical magnitudes shared across a core

use serde::{Deserialize, Serialize};

pub const DEFAULT_SOUND_SPEED: f32 = 343.0;

/// Attenuation per distance doubling that yields an exact 1/d gain law.
pub const DEFAULT_ANECHOIC_ATTENUATION_DB: f32 = -6.0206;

/// Reverb decays more gently with distance than the direct path.
pub const DEFAULT_REVERB_ATTENUATION_DB: f32 = -3.0;

/// Attack time of the exponential gain smoother used by distance attenuation.
pub const ATTACK_TIME_DISTANCE_ATTENUATION_MS: f32 = 120.0;

/// Sound speed and distance-attenuation constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Magnitudes {
    pub sound_speed: f32,
    /// dB per distance doubling on the anechoic path (negative).
    pub anechoic_attenuation_db: f32,
    /// dB per distance doubling on the reverb path (negative).
    pub reverb_attenuation_db: f32,
}

impl Default for Magnitudes {
    fn default() -> Self {
        Self {
            sound_speed: DEFAULT_SOUND_SPEED,
            anechoic_attenuation_db: DEFAULT_ANECHOIC_ATTENUATION_DB,
            reverb_attenuation_db: DEFAULT_REVERB_ATTENUATION_DB,
        }
    }
}

impl Magnitudes {
    /// Linear gain for a source at `distance` metres given a per-doubling
    /// attenuation constant. Reference distance is 1 m; closer sources gain.
    pub fn distance_gain(attenuation_db_per_doubling: f32, distance: f32) -> f32 {
        if distance <= 1e-6 {
            return 1.0;
        }
        10.0f32.powf(attenuation_db_per_doubling * distance.log2() / 20.0)
    }

    pub fn anechoic_distance_gain(&self, distance: f32) -> f32 {
        Self::distance_gain(self.anechoic_attenuation_db, distance)
    }

    pub fn reverb_distance_gain(&self, distance: f32) -> f32 {
        Self::distance_gain(self.reverb_attenuation_db, distance)
    }
}

/// Loose float comparison used by the geometry paths.
pub fn are_same(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() < epsilon
}
