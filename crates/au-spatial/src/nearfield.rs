//! Near-field ILD coefficient store
//!
//! Close sources show strong interaural level differences that the far-field
//! HRIR table cannot express. The host loads a precomputed table of biquad
//! coefficients keyed by (distance, interaural azimuth); queries snap to the
//! nearest grid entry. The same table format drives the high-performance
//! ILD-only spatializer.

use std::collections::BTreeMap;

use au_core::{Ear, EarPair, ResultId, Sample};

/// Sources beyond this distance skip the near-field correction.
pub const NEAR_FIELD_DISTANCE_THRESHOLD_M: f32 = 2.0;

/// Table quantization steps.
pub const DISTANCE_STEP_CM: i32 = 10;
pub const AZIMUTH_STEP_DEG: i32 = 5;

/// Two cascaded 5-coefficient biquad sections for one ear.
pub type IldCoefficients = [[Sample; 5]; 2];

#[derive(Debug, Default)]
pub struct IldStore {
    near_field: BTreeMap<(i32, i32), EarPair<IldCoefficients>>,
    spatialization: BTreeMap<(i32, i32), EarPair<IldCoefficients>>,
}

fn quantize_key(distance_m: f32, interaural_azimuth_deg: f32) -> (i32, i32) {
    let d = ((distance_m * 100.0 / DISTANCE_STEP_CM as f32).round() as i32) * DISTANCE_STEP_CM;
    let a = ((interaural_azimuth_deg / AZIMUTH_STEP_DEG as f32).round() as i32) * AZIMUTH_STEP_DEG;
    (d, a)
}

fn lookup<'a>(
    table: &'a BTreeMap<(i32, i32), EarPair<IldCoefficients>>,
    ear: Ear,
    distance_m: f32,
    interaural_azimuth_deg: f32,
) -> Option<&'a IldCoefficients> {
    if !ear.is_single() {
        au_core::report!(
            ResultId::NotAllowed,
            "ILD coefficients requested for BOTH or NONE"
        );
        return None;
    }
    if table.is_empty() {
        au_core::report!(
            ResultId::NotSet,
            "ILD table is empty",
            "load the table before spatializing close sources"
        );
        return None;
    }
    let key = quantize_key(distance_m, interaural_azimuth_deg);
    let entry = match table.get(&key) {
        Some(e) => e,
        None => {
            // Snap to the closest loaded entry.
            table
                .iter()
                .min_by_key(|((d, a), _)| {
                    (d - key.0).abs() * AZIMUTH_STEP_DEG + (a - key.1).abs() * DISTANCE_STEP_CM
                })
                .map(|(_, e)| e)?
        }
    };
    entry.get(ear)
}

impl IldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.near_field.is_empty() && self.spatialization.is_empty()
    }

    pub fn near_field_len(&self) -> usize {
        self.near_field.len()
    }

    /// Install a near-field correction entry. Distance in metres, interaural
    /// azimuth in degrees [-90, 90].
    pub fn add_near_field_coefficients(
        &mut self,
        distance_m: f32,
        interaural_azimuth_deg: f32,
        coefficients: EarPair<IldCoefficients>,
    ) {
        self.near_field
            .insert(quantize_key(distance_m, interaural_azimuth_deg), coefficients);
    }

    /// Install an entry for the high-performance ILD spatializer.
    pub fn add_spatialization_coefficients(
        &mut self,
        distance_m: f32,
        interaural_azimuth_deg: f32,
        coefficients: EarPair<IldCoefficients>,
    ) {
        self.spatialization
            .insert(quantize_key(distance_m, interaural_azimuth_deg), coefficients);
    }

    /// Near-field correction coefficients, snapped to the nearest entry.
    pub fn near_field_coefficients(
        &self,
        ear: Ear,
        distance_m: f32,
        interaural_azimuth_deg: f32,
    ) -> Option<&IldCoefficients> {
        lookup(&self.near_field, ear, distance_m, interaural_azimuth_deg)
    }

    /// High-performance spatialization coefficients, snapped to the nearest
    /// entry.
    pub fn spatialization_coefficients(
        &self,
        ear: Ear,
        distance_m: f32,
        interaural_azimuth_deg: f32,
    ) -> Option<&IldCoefficients> {
        lookup(&self.spatialization, ear, distance_m, interaural_azimuth_deg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_section(gain: f32) -> IldCoefficients {
        [[gain, 0.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0, 0.0]]
    }

    #[test]
    fn test_quantized_lookup() {
        let mut store = IldStore::new();
        store.add_near_field_coefficients(
            0.5,
            10.0,
            EarPair::new(gain_section(0.5), gain_section(0.7)),
        );
        // 48 cm, 11 degrees snaps to (50 cm, 10 deg)
        let got = store.near_field_coefficients(Ear::Left, 0.48, 11.0).unwrap();
        assert_eq!(got[0][0], 0.5);
        let got = store.near_field_coefficients(Ear::Right, 0.48, 11.0).unwrap();
        assert_eq!(got[0][0], 0.7);
    }

    #[test]
    fn test_rejects_both_and_empty() {
        let mut store = IldStore::new();
        assert!(store.near_field_coefficients(Ear::Left, 0.5, 0.0).is_none());
        store.add_near_field_coefficients(0.5, 0.0, EarPair::splat(gain_section(1.0)));
        assert!(store.near_field_coefficients(Ear::Both, 0.5, 0.0).is_none());
        assert!(store.near_field_coefficients(Ear::Left, 0.5, 0.0).is_some());
    }

    #[test]
    fn test_tables_are_independent() {
        let mut store = IldStore::new();
        store.add_spatialization_coefficients(1.0, 0.0, EarPair::splat(gain_section(0.9)));
        assert!(store.near_field_coefficients(Ear::Left, 1.0, 0.0).is_none());
        assert!(store
            .spatialization_coefficients(Ear::Left, 1.0, 0.0)
            .is_some());
    }

    #[test]
    fn test_falls_back_to_nearest() {
        let mut store = IldStore::new();
        store.add_near_field_coefficients(1.0, 0.0, EarPair::splat(gain_section(0.9)));
        // Far off-grid query still resolves to the only entry
        let got = store.near_field_coefficients(Ear::Left, 1.9, 60.0).unwrap();
        assert_eq!(got[0][0], 0.9);
    }
}
