//! Listener: head transform, HRIR/ILD stores and directionality

use au_core::{Ear, EarPair, Transform, Vector3};

use crate::hrtf::HrirStore;
use crate::nearfield::IldStore;

pub const DEFAULT_HEAD_RADIUS_M: f32 = 0.0875;

/// Attenuation applied with the ILD spatializer in high-performance mode.
pub const ILD_ATTENUATION_DB: f32 = -6.0;

/// Steps for the spherical integral of the reverb directionality.
const CARDIOID_INTEGRATION_STEPS: usize = 100;

/// Directionality cardioid gain: `1 - k + k*cos(angle)` with the notch depth
/// `k` derived from the extension in dB (clamped to [0, 30]).
pub fn directionality_linear_attenuation(extension_db: f32, angle_to_forward_rad: f32) -> f32 {
    let extension = extension_db.clamp(0.0, 30.0);
    let factor = 0.5 - 0.5 * 10f32.powf(-extension / 20.0);
    1.0 - factor + factor * angle_to_forward_rad.cos()
}

/// Reverb-path directionality: RMS of the cardioid over the sphere (the
/// rings weighted by sin of the polar angle), so an omnidirectional pattern
/// stays unity.
pub fn reverb_directionality_linear_attenuation(extension_db: f32) -> f32 {
    let step = std::f32::consts::PI / CARDIOID_INTEGRATION_STEPS as f32;
    let mut angle = 0.0f32;
    let mut weighted = 0.0f32;
    let mut weight = 0.0f32;
    for _ in 0..=CARDIOID_INTEGRATION_STEPS {
        let g = directionality_linear_attenuation(extension_db, angle);
        weighted += g * g * angle.sin();
        weight += angle.sin();
        angle += step;
    }
    (weighted / weight.max(1e-9)).sqrt()
}

#[derive(Debug)]
pub struct Listener {
    transform: Transform,
    head_radius_m: f32,
    hrtf: HrirStore,
    ild: IldStore,
    directionality_enabled: EarPair<bool>,
    anechoic_directionality_extension_db: EarPair<f32>,
    reverb_directionality_gain: EarPair<f32>,
    custom_itd_enabled: bool,
}

impl Listener {
    pub fn new(head_radius_m: f32, block_size: usize) -> Self {
        Self {
            transform: Transform::default(),
            head_radius_m,
            hrtf: HrirStore::new(block_size),
            ild: IldStore::new(),
            directionality_enabled: EarPair::new(false, false),
            anechoic_directionality_extension_db: EarPair::new(0.0, 0.0),
            reverb_directionality_gain: EarPair::new(1.0, 1.0),
            custom_itd_enabled: false,
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn head_radius(&self) -> f32 {
        self.head_radius_m
    }

    pub fn set_head_radius(&mut self, radius_m: f32) {
        self.head_radius_m = radius_m.max(0.0);
    }

    pub fn hrtf(&self) -> &HrirStore {
        &self.hrtf
    }

    pub fn hrtf_mut(&mut self) -> &mut HrirStore {
        &mut self.hrtf
    }

    pub fn ild(&self) -> &IldStore {
        &self.ild
    }

    pub fn ild_mut(&mut self) -> &mut IldStore {
        &mut self.ild
    }

    /// Ear position in the head frame: on the interaural (Y) axis.
    pub fn ear_local_position(&self, ear: Ear) -> Vector3 {
        match ear {
            Ear::Left => Vector3::new(0.0, self.head_radius_m, 0.0),
            Ear::Right => Vector3::new(0.0, -self.head_radius_m, 0.0),
            _ => Vector3::zero(),
        }
    }

    /// World transform of one ear.
    pub fn ear_transform(&self, ear: Ear) -> Transform {
        self.transform.translated_local(self.ear_local_position(ear))
    }

    pub fn enable_custom_itd(&mut self, enabled: bool) {
        self.custom_itd_enabled = enabled;
    }

    pub fn is_custom_itd_enabled(&self) -> bool {
        self.custom_itd_enabled
    }

    pub fn enable_directionality(&mut self, ear: Ear, enabled: bool) {
        self.directionality_enabled
            .for_each_selected(ear, |e| *e = enabled);
    }

    pub fn is_directionality_enabled(&self, ear: Ear) -> bool {
        *self.directionality_enabled.get(ear).unwrap_or(&false)
    }

    /// Set the directionality extension in dB for the selected ear(s). The
    /// anechoic path evaluates the cardioid per block against the source
    /// angle; the reverb path uses the pattern's RMS over the sphere.
    pub fn set_directionality_db(&mut self, ear: Ear, extension_db: f32) {
        let reverb = reverb_directionality_linear_attenuation(extension_db);
        self.anechoic_directionality_extension_db
            .for_each_selected(ear, |g| *g = extension_db);
        self.reverb_directionality_gain
            .for_each_selected(ear, |g| *g = reverb);
    }

    /// Extension (dB) used to evaluate the cardioid for a source angle.
    pub fn anechoic_directionality_extension_db(&self, ear: Ear) -> f32 {
        *self
            .anechoic_directionality_extension_db
            .get(ear)
            .unwrap_or(&0.0)
    }

    pub fn reverb_directionality_gain(&self, ear: Ear) -> f32 {
        *self.reverb_directionality_gain.get(ear).unwrap_or(&1.0)
    }
}
