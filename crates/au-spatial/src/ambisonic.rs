//! Higher-order virtual-Ambisonic spatialization
//!
//! Sources are encoded per ear into `(N+1)^2` spherical-harmonic channels
//! (after their expansion-delay ITD and near-field stages), each channel is
//! convolved with an Ambisonic HRIR derived from a virtual-loudspeaker
//! decode of the HRTF, and the stereo mix is the arithmetic mean across
//! channels: the channel sum divided by the channel count, not by a
//! gain-normalization coefficient.

use au_core::{EarPair, ResultId, Sample, Vector3};
use au_dsp::upc::PartitionedIr;
use au_dsp::UpcConvolver;

use crate::hrtf::StoreEar;
use crate::source::{SingleSourceDsp, SpatialContext};

pub const MAX_AMBISONIC_CHANNELS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbisonicOrder {
    #[default]
    First,
    Second,
    Third,
}

impl AmbisonicOrder {
    pub fn order(self) -> usize {
        match self {
            AmbisonicOrder::First => 1,
            AmbisonicOrder::Second => 2,
            AmbisonicOrder::Third => 3,
        }
    }

    pub fn channel_count(self) -> usize {
        let n = self.order();
        (n + 1) * (n + 1)
    }

    /// Number of uniformly distributed virtual loudspeakers used to derive
    /// the Ambisonic HRIR: octahedron, icosahedron or dodecahedron vertices.
    pub fn loudspeaker_count(self) -> usize {
        match self {
            AmbisonicOrder::First => 6,
            AmbisonicOrder::Second => 12,
            AmbisonicOrder::Third => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbisonicNormalization {
    #[default]
    N3D,
    SN3D,
    MaxN,
}

/// Virtual loudspeaker directions (azimuth, elevation in degrees).
pub fn loudspeaker_directions(order: AmbisonicOrder) -> Vec<(f32, f32)> {
    match order {
        // Octahedron: the six cardinal directions.
        AmbisonicOrder::First => vec![
            (0.0, 0.0),
            (90.0, 0.0),
            (180.0, 0.0),
            (270.0, 0.0),
            (0.0, 90.0),
            (0.0, 270.0),
        ],
        // Icosahedron: poles plus two interleaved rings.
        AmbisonicOrder::Second => {
            let ring = (0.5f32).atan().to_degrees(); // ~26.57
            let mut dirs = vec![(0.0, 90.0), (0.0, 270.0)];
            for k in 0..5 {
                dirs.push((72.0 * k as f32, ring));
                dirs.push((36.0 + 72.0 * k as f32, 360.0 - ring));
            }
            dirs
        }
        // Dodecahedron vertices, generated from the canonical coordinates.
        AmbisonicOrder::Third => {
            let phi = (1.0 + 5f32.sqrt()) / 2.0;
            let inv = 1.0 / phi;
            let mut vertices = Vec::with_capacity(20);
            for x in [-1.0f32, 1.0] {
                for y in [-1.0f32, 1.0] {
                    for z in [-1.0f32, 1.0] {
                        vertices.push(Vector3::new(x, y, z));
                    }
                }
            }
            for a in [-inv, inv] {
                for b in [-phi, phi] {
                    vertices.push(Vector3::new(0.0, a, b));
                    vertices.push(Vector3::new(a, b, 0.0));
                    vertices.push(Vector3::new(b, 0.0, a));
                }
            }
            vertices
                .into_iter()
                .map(|v| (v.azimuth_degrees(), v.elevation_degrees()))
                .collect()
        }
    }
}

/// Real spherical harmonics in N3D up to order 3 at (azimuth, elevation)
/// in radians, elevation signed around the horizon.
pub fn real_spherical_harmonics(
    azimuth: f32,
    elevation: f32,
    order: AmbisonicOrder,
    factors: &mut [f32],
) {
    let channels = order.channel_count();
    debug_assert!(channels <= MAX_AMBISONIC_CHANNELS);
    debug_assert!(factors.len() >= channels);
    let (sin_az, cos_az) = azimuth.sin_cos();
    let (sin_el, cos_el) = elevation.sin_cos();

    factors[0] = 1.0;
    factors[1] = 3f32.sqrt() * cos_el * sin_az;
    factors[2] = 3f32.sqrt() * sin_el;
    factors[3] = 3f32.sqrt() * cos_el * cos_az;

    if channels > 4 {
        let sin_2az = (2.0 * azimuth).sin();
        let cos_2az = (2.0 * azimuth).cos();
        let sin_2el = (2.0 * elevation).sin();
        factors[4] = (15f32.sqrt() / 2.0) * cos_el * cos_el * sin_2az;
        factors[5] = (15f32.sqrt() / 2.0) * sin_2el * sin_az;
        factors[6] = (5f32.sqrt() / 2.0) * (3.0 * sin_el * sin_el - 1.0);
        factors[7] = (15f32.sqrt() / 2.0) * sin_2el * cos_az;
        factors[8] = (15f32.sqrt() / 2.0) * cos_el * cos_el * cos_2az;
    }
    if channels > 9 {
        let sin_3az = (3.0 * azimuth).sin();
        let cos_3az = (3.0 * azimuth).cos();
        let sin_2az = (2.0 * azimuth).sin();
        let cos_2az = (2.0 * azimuth).cos();
        let cos_el3 = cos_el * cos_el * cos_el;
        let five_sin2_minus_1 = 5.0 * sin_el * sin_el - 1.0;
        factors[9] = (35.0f32 / 8.0).sqrt() * cos_el3 * sin_3az;
        factors[10] = (105f32.sqrt() / 2.0) * sin_el * cos_el * cos_el * sin_2az;
        factors[11] = (21.0f32 / 8.0).sqrt() * cos_el * five_sin2_minus_1 * sin_az;
        factors[12] = (7f32.sqrt() / 2.0) * sin_el * (5.0 * sin_el * sin_el - 3.0);
        factors[13] = (21.0f32 / 8.0).sqrt() * cos_el * five_sin2_minus_1 * cos_az;
        factors[14] = (105f32.sqrt() / 2.0) * sin_el * cos_el * cos_el * cos_2az;
        factors[15] = (35.0f32 / 8.0).sqrt() * cos_el3 * cos_3az;
    }
}

/// Convert N3D factors in place to the requested normalization.
pub fn convert_normalization(factors: &mut [f32], normalization: AmbisonicNormalization) {
    match normalization {
        AmbisonicNormalization::N3D => {}
        AmbisonicNormalization::SN3D => {
            for (i, f) in factors.iter_mut().enumerate() {
                let scale = match i {
                    1..=3 => 3f32.sqrt(),
                    4..=8 => 5f32.sqrt(),
                    9..=15 => 7f32.sqrt(),
                    _ => 1.0,
                };
                *f /= scale;
            }
        }
        AmbisonicNormalization::MaxN => {
            for (i, f) in factors.iter_mut().enumerate() {
                let scale = match i {
                    0 => 1.0 / 2f32.sqrt(),
                    1..=3 => 1.0 / 3f32.sqrt(),
                    4 | 5 | 7 | 8 => 2.0 / 15f32.sqrt(),
                    6 => 1.0 / 5f32.sqrt(),
                    9 | 15 => (8.0f32 / 35.0).sqrt(),
                    10 | 14 => 3.0 / 35f32.sqrt(),
                    11 | 13 => (45.0f32 / 224.0).sqrt(),
                    12 => 1.0 / 7f32.sqrt(),
                    _ => 1.0,
                };
                *f *= scale;
            }
        }
    }
}

pub struct AmbisonicDsp {
    order: AmbisonicOrder,
    normalization: AmbisonicNormalization,
    interpolation: bool,
    block_size: usize,
    /// Per-channel binaural impulse responses decoded from the HRTF.
    ahrbir: Vec<EarPair<PartitionedIr>>,
    convolvers: Vec<EarPair<UpcConvolver>>,
    encoded: EarPair<Vec<Vec<Sample>>>,
    factors: EarPair<Vec<f32>>,
    ear_feed: EarPair<Vec<Sample>>,
    channel_out: Vec<Sample>,
}

impl std::fmt::Debug for AmbisonicDsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbisonicDsp")
            .field("order", &self.order)
            .field("normalization", &self.normalization)
            .finish()
    }
}

impl AmbisonicDsp {
    pub fn new(
        block_size: usize,
        order: AmbisonicOrder,
        normalization: AmbisonicNormalization,
    ) -> Self {
        let channels = order.channel_count();
        Self {
            order,
            normalization,
            interpolation: true,
            block_size,
            ahrbir: Vec::new(),
            convolvers: (0..channels)
                .map(|_| {
                    EarPair::new(
                        UpcConvolver::new(block_size, 0),
                        UpcConvolver::new(block_size, 0),
                    )
                })
                .collect(),
            encoded: EarPair::new(
                vec![vec![0.0; block_size]; channels],
                vec![vec![0.0; block_size]; channels],
            ),
            factors: EarPair::new(vec![0.0; channels], vec![0.0; channels]),
            ear_feed: EarPair::new(vec![0.0; block_size], vec![0.0; block_size]),
            channel_out: vec![0.0; block_size],
        }
    }

    pub fn order(&self) -> AmbisonicOrder {
        self.order
    }

    pub fn normalization(&self) -> AmbisonicNormalization {
        self.normalization
    }

    pub fn set_interpolation(&mut self, enabled: bool) {
        self.interpolation = enabled;
    }

    pub fn is_initialized(&self) -> bool {
        !self.ahrbir.is_empty()
    }

    /// The stereo mix divides the channel sum by the channel count
    /// (arithmetic mean), not by a gain-normalization coefficient.
    pub fn mixing_divisor(&self) -> f32 {
        self.order.channel_count() as f32
    }

    /// Derive the per-channel Ambisonic HRIR from a loaded HRTF by decoding
    /// the virtual loudspeaker ring.
    pub fn set_ahrbir(&mut self, ctx: &SpatialContext<'_>) -> bool {
        let hrtf = ctx.listener.hrtf();
        if !hrtf.is_loaded() {
            au_core::report!(
                ResultId::NotSet,
                "cannot derive the Ambisonic HRIR before the HRTF is loaded"
            );
            return false;
        }

        let channels = self.order.channel_count();
        let subfilters = hrtf.num_subfilters();
        let slen = hrtf.subfilter_len();
        let directions = loudspeaker_directions(self.order);

        let mut decoded: Vec<EarPair<PartitionedIr>> = (0..channels)
            .map(|_| {
                EarPair::new(
                    vec![vec![0.0; slen]; subfilters],
                    vec![vec![0.0; slen]; subfilters],
                )
            })
            .collect();

        let mut factors = vec![0.0f32; channels];
        for (azimuth, elevation) in directions {
            let Some(left) =
                hrtf.hrir_partitioned(StoreEar::Left, azimuth, elevation, self.interpolation)
            else {
                return false;
            };
            let Some(right) =
                hrtf.hrir_partitioned(StoreEar::Right, azimuth, elevation, self.interpolation)
            else {
                return false;
            };

            let mut el = elevation;
            if el >= 270.0 {
                el -= 360.0;
            }
            real_spherical_harmonics(
                azimuth.to_radians(),
                el.to_radians(),
                self.order,
                &mut factors,
            );
            convert_normalization(&mut factors, self.normalization);

            for (channel, target) in decoded.iter_mut().enumerate() {
                let f = factors[channel];
                for k in 0..subfilters {
                    for i in 0..slen {
                        target.left[k][i] += left[k][i] * f;
                        target.right[k][i] += right[k][i] * f;
                    }
                }
            }
        }

        self.ahrbir = decoded;
        self.convolvers = (0..channels)
            .map(|_| {
                EarPair::new(
                    UpcConvolver::new(self.block_size, subfilters),
                    UpcConvolver::new(self.block_size, subfilters),
                )
            })
            .collect();
        true
    }

    /// Spatialize the given sources through the Ambisonic pipeline.
    ///
    /// Each source contributes its buffer (after far-distance, distance
    /// attenuation, per-ear expansion-delay ITD and near-field stages) to
    /// the per-ear channel sets, encoded at its per-ear direction.
    pub fn process_virtual_ambisonic_anechoic<'a>(
        &mut self,
        ctx: &SpatialContext<'_>,
        sources: impl IntoIterator<Item = &'a mut SingleSourceDsp>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        out_left.fill(0.0);
        out_right.fill(0.0);
        if !self.is_initialized() {
            au_core::report!(
                ResultId::NotInitialized,
                "Ambisonic process before SetAHRBIR"
            );
            return;
        }

        let channels = self.order.channel_count();
        for ear_channels in [&mut self.encoded.left, &mut self.encoded.right] {
            for channel in ear_channels.iter_mut() {
                channel.fill(0.0);
            }
        }

        let mut any_source = false;
        for source in sources {
            if !source.is_anechoic_ready() {
                au_core::report!(
                    ResultId::Warning,
                    "Ambisonic process without a fresh source buffer",
                    "call SetBuffer before processing"
                );
                continue;
            }
            if !source.prepare_ambisonic_feed(ctx, &mut self.ear_feed.left, &mut self.ear_feed.right)
            {
                continue;
            }
            any_source = true;
            let coordinates = *source.coordinates();

            for (feed, factors, encoded, azimuth, elevation) in [
                (
                    &self.ear_feed.left,
                    &mut self.factors.left,
                    &mut self.encoded.left,
                    coordinates.left_azimuth,
                    coordinates.left_elevation,
                ),
                (
                    &self.ear_feed.right,
                    &mut self.factors.right,
                    &mut self.encoded.right,
                    coordinates.right_azimuth,
                    coordinates.right_elevation,
                ),
            ] {
                let mut el = elevation;
                if el >= 270.0 {
                    el -= 360.0;
                }
                real_spherical_harmonics(
                    azimuth.to_radians(),
                    el.to_radians(),
                    self.order,
                    factors,
                );
                convert_normalization(factors, self.normalization);
                for channel in 0..channels {
                    let f = factors[channel];
                    for (acc, s) in encoded[channel].iter_mut().zip(feed.iter()) {
                        *acc += s * f;
                    }
                }
            }
        }
        if !any_source {
            return;
        }

        // Per-channel convolution with the decoded HRIRs; the stereo mix is
        // the channel mean.
        let divisor = self.mixing_divisor();
        for channel in 0..channels {
            let abir = &self.ahrbir[channel];
            let convolvers = &mut self.convolvers[channel];

            convolvers.left.process(
                &self.encoded.left[channel],
                &abir.left,
                &mut self.channel_out,
            );
            for (o, v) in out_left.iter_mut().zip(self.channel_out.iter()) {
                *o += v / divisor;
            }
            convolvers.right.process(
                &self.encoded.right[channel],
                &abir.right,
                &mut self.channel_out,
            );
            for (o, v) in out_right.iter_mut().zip(self.channel_out.iter()) {
                *o += v / divisor;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_channel_counts() {
        assert_eq!(AmbisonicOrder::First.channel_count(), 4);
        assert_eq!(AmbisonicOrder::Second.channel_count(), 9);
        assert_eq!(AmbisonicOrder::Third.channel_count(), 16);
        assert_eq!(AmbisonicOrder::First.loudspeaker_count(), 6);
        assert_eq!(AmbisonicOrder::Second.loudspeaker_count(), 12);
        assert_eq!(AmbisonicOrder::Third.loudspeaker_count(), 20);
    }

    #[test]
    fn test_loudspeaker_layouts_are_unit_and_complete() {
        for order in [
            AmbisonicOrder::First,
            AmbisonicOrder::Second,
            AmbisonicOrder::Third,
        ] {
            let dirs = loudspeaker_directions(order);
            assert_eq!(dirs.len(), order.loudspeaker_count());
        }
    }

    #[test]
    fn test_first_order_harmonics() {
        let mut f = [0.0f32; 4];
        // Straight ahead: only W and X
        real_spherical_harmonics(0.0, 0.0, AmbisonicOrder::First, &mut f);
        assert_relative_eq!(f[0], 1.0);
        assert_relative_eq!(f[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(f[2], 0.0, epsilon = 1e-6);
        assert_relative_eq!(f[3], 3f32.sqrt(), epsilon = 1e-6);
        // Straight left: Y carries the signal
        real_spherical_harmonics(
            std::f32::consts::FRAC_PI_2,
            0.0,
            AmbisonicOrder::First,
            &mut f,
        );
        assert_relative_eq!(f[1], 3f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(f[3], 0.0, epsilon = 1e-5);
        // Zenith: Z carries it
        real_spherical_harmonics(0.0, std::f32::consts::FRAC_PI_2, AmbisonicOrder::First, &mut f);
        assert_relative_eq!(f[2], 3f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_sn3d_conversion() {
        let mut f = [0.0f32; 9];
        real_spherical_harmonics(0.7, 0.3, AmbisonicOrder::Second, &mut f);
        let n3d = f;
        convert_normalization(&mut f, AmbisonicNormalization::SN3D);
        assert_relative_eq!(f[0], n3d[0]);
        for i in 1..4 {
            assert_relative_eq!(f[i], n3d[i] / 3f32.sqrt(), epsilon = 1e-6);
        }
        for i in 4..9 {
            assert_relative_eq!(f[i], n3d[i] / 5f32.sqrt(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_maxn_first_order_peaks_at_unity() {
        let mut f = [0.0f32; 4];
        real_spherical_harmonics(std::f32::consts::FRAC_PI_2, 0.0, AmbisonicOrder::First, &mut f);
        convert_normalization(&mut f, AmbisonicNormalization::MaxN);
        // Y at its maximum direction reaches 1 under maxN
        assert_relative_eq!(f[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mixing_divisor_is_channel_count() {
        let dsp = AmbisonicDsp::new(128, AmbisonicOrder::Second, AmbisonicNormalization::N3D);
        assert_eq!(dsp.mixing_divisor(), 9.0);
    }
}
