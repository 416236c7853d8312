//! Envelope following and downward expansion

use au_core::Sample;

/// Floor applied when converting an envelope to decibels.
const ENVELOPE_FLOOR_DB: f32 = -120.0;

/// Peak envelope follower with separate attack and release one-poles.
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    sample_rate: f32,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f32) -> Self {
        let mut e = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            sample_rate,
        };
        e.set_times(20.0, 100.0);
        e
    }

    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32) {
        self.attack_coeff = (-1.0 / (attack_ms.max(0.01) * 0.001 * self.sample_rate)).exp();
        self.release_coeff = (-1.0 / (release_ms.max(0.01) * 0.001 * self.sample_rate)).exp();
    }

    #[inline(always)]
    pub fn process(&mut self, input: Sample) -> f32 {
        let level = input.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * (self.envelope - level) + level;
        self.envelope
    }

    pub fn current(&self) -> f32 {
        self.envelope
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// Downward expander: below the threshold, every dB of input becomes `ratio`
/// dB of output.
#[derive(Debug, Clone)]
pub struct Expander {
    threshold_db: f32,
    ratio: f32,
    envelope: EnvelopeFollower,
}

impl Expander {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            threshold_db: -60.0,
            ratio: 1.0,
            envelope: EnvelopeFollower::new(sample_rate),
        }
    }

    pub fn set_threshold_db(&mut self, db: f32) {
        self.threshold_db = db;
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.max(1.0);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32) {
        self.envelope.set_times(attack_ms, release_ms);
    }

    #[inline(always)]
    fn gain_for(&self, env: f32) -> f32 {
        let env_db = if env > 1e-6 {
            20.0 * env.log10()
        } else {
            ENVELOPE_FLOOR_DB
        };
        if env_db >= self.threshold_db || self.ratio <= 1.0 {
            return 1.0;
        }
        let gain_db = (env_db - self.threshold_db) * (self.ratio - 1.0);
        10.0f32.powf(gain_db.max(ENVELOPE_FLOOR_DB) / 20.0)
    }

    pub fn process(&mut self, buffer: &mut [Sample]) {
        for s in buffer.iter_mut() {
            let env = self.envelope.process(*s);
            *s *= self.gain_for(env);
        }
    }

    pub fn reset(&mut self) {
        self.envelope.reset();
    }
}
