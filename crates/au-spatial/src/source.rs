//! Single-source anechoic DSP
//!
//! Per block: geometry (per-ear sphere projection), far-distance low-pass,
//! smoothed distance attenuation, partitioned HRIR convolution, expansion-
//! method ITD, near-field ILD and listener directionality. Alternate modes
//! replace the convolution with an ILD filter pair (high performance) or a
//! plain copy (no spatialization).
//!
//! A source never points back at its core: every block call borrows an
//! immutable [`SpatialContext`] view of the shared state.

use au_core::{buffer, AudioState, Ear, EarPair, Magnitudes, ResultId, Sample, Transform, Vector3};
use au_dsp::upc::PartitionedIr;
use au_dsp::{BiquadCoeffs, BiquadFilter, FilterChain, UpcConvolver};

use crate::hrtf::StoreEar;
use crate::listener::{directionality_linear_attenuation, Listener, ILD_ATTENUATION_DB};
use crate::nearfield::NEAR_FIELD_DISTANCE_THRESHOLD_M;

/// Distance beyond which the far-distance low-pass engages.
pub const FAR_DISTANCE_THRESHOLD_M: f32 = 15.0;

/// Sources closer than this to the head centre are treated as coincident.
const EPSILON_DISTANCE: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatializationMode {
    NoSpatialization,
    HighPerformance,
    #[default]
    HighQuality,
}

/// Immutable view of the per-core shared state, borrowed for one block.
#[derive(Clone, Copy)]
pub struct SpatialContext<'a> {
    pub audio_state: AudioState,
    pub magnitudes: &'a Magnitudes,
    pub listener: &'a Listener,
}

/// Geometry of a source relative to the listener, recomputed per block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceCoordinates {
    pub distance: f32,
    pub left_azimuth: f32,
    pub left_elevation: f32,
    pub right_azimuth: f32,
    pub right_elevation: f32,
    pub center_azimuth: f32,
    pub center_elevation: f32,
    pub interaural_azimuth_deg: f32,
    pub angle_to_forward_axis_rad: f32,
}

/// Project a source seen from one ear onto the sphere of the HRTF
/// measurement distance centred on the head. Returns the intersection of
/// the ear-to-source ray with that sphere.
fn sphere_projection(vector_to_ear: Vector3, ear_local: Vector3, radius: f32) -> Vector3 {
    let a = vector_to_ear.dot(&vector_to_ear);
    if a < 1e-12 {
        return ear_local;
    }
    let b = 2.0 * ear_local.dot(&vector_to_ear);
    let c = ear_local.dot(&ear_local) - radius * radius;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    let t = (-b + discriminant.sqrt()) / (2.0 * a);
    ear_local + vector_to_ear.scaled(t)
}

pub struct SingleSourceDsp {
    transform: Transform,
    internal_buffer: Vec<Sample>,
    mode: SpatializationMode,

    enable_interpolation: bool,
    enable_anechoic: bool,
    enable_reverb: bool,
    enable_far_distance: bool,
    enable_distance_attenuation_anechoic: bool,
    enable_distance_attenuation_reverb: bool,
    enable_near_field: bool,

    ready_for_anechoic: bool,
    ready_for_reverb: bool,

    coordinates: SourceCoordinates,

    upc: EarPair<UpcConvolver>,
    hrir_scratch: EarPair<PartitionedIr>,
    channel_scratch: EarPair<Vec<Sample>>,
    delay_carry: EarPair<Vec<Sample>>,
    near_field_filters: EarPair<FilterChain>,
    ild_filters: EarPair<FilterChain>,
    far_distance_filter: BiquadFilter,

    attenuation_state_anechoic: f32,
    attenuation_state_reverb: f32,

    work: Vec<Sample>,
}

impl std::fmt::Debug for SingleSourceDsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleSourceDsp")
            .field("mode", &self.mode)
            .field("distance", &self.coordinates.distance)
            .finish()
    }
}

fn two_section_chain() -> FilterChain {
    let mut chain = FilterChain::new();
    chain.add_filter();
    chain.add_filter();
    chain
}

impl SingleSourceDsp {
    pub fn new(audio_state: AudioState, num_subfilters: usize, subfilter_len: usize) -> Self {
        let block = audio_state.block_size;
        let make_upc = || UpcConvolver::new(block, num_subfilters);
        let make_scratch = || vec![vec![0.0; subfilter_len]; num_subfilters];
        Self {
            transform: Transform::default(),
            internal_buffer: vec![0.0; block],
            mode: SpatializationMode::HighQuality,
            enable_interpolation: true,
            enable_anechoic: true,
            enable_reverb: true,
            enable_far_distance: true,
            enable_distance_attenuation_anechoic: true,
            enable_distance_attenuation_reverb: true,
            enable_near_field: true,
            ready_for_anechoic: false,
            ready_for_reverb: false,
            coordinates: SourceCoordinates::default(),
            upc: EarPair::new(make_upc(), make_upc()),
            hrir_scratch: EarPair::new(make_scratch(), make_scratch()),
            channel_scratch: EarPair::new(vec![0.0; block], vec![0.0; block]),
            delay_carry: EarPair::new(Vec::new(), Vec::new()),
            near_field_filters: EarPair::new(two_section_chain(), two_section_chain()),
            ild_filters: EarPair::new(two_section_chain(), two_section_chain()),
            far_distance_filter: BiquadFilter::new(),
            attenuation_state_anechoic: 1.0,
            attenuation_state_reverb: 1.0,
            work: vec![0.0; block],
        }
    }

    // ---- Configuration -------------------------------------------------------

    pub fn set_spatialization_mode(&mut self, mode: SpatializationMode) {
        self.mode = mode;
    }

    pub fn spatialization_mode(&self) -> SpatializationMode {
        self.mode
    }

    pub fn set_interpolation(&mut self, enabled: bool) {
        self.enable_interpolation = enabled;
    }

    pub fn is_interpolation_enabled(&self) -> bool {
        self.enable_interpolation
    }

    pub fn set_anechoic_enabled(&mut self, enabled: bool) {
        self.enable_anechoic = enabled;
    }

    pub fn is_anechoic_enabled(&self) -> bool {
        self.enable_anechoic
    }

    pub fn set_reverb_enabled(&mut self, enabled: bool) {
        self.enable_reverb = enabled;
    }

    pub fn is_reverb_enabled(&self) -> bool {
        self.enable_reverb
    }

    pub fn set_far_distance_enabled(&mut self, enabled: bool) {
        self.enable_far_distance = enabled;
    }

    pub fn set_distance_attenuation_anechoic(&mut self, enabled: bool) {
        self.enable_distance_attenuation_anechoic = enabled;
    }

    pub fn set_distance_attenuation_reverb(&mut self, enabled: bool) {
        self.enable_distance_attenuation_reverb = enabled;
    }

    pub fn is_distance_attenuation_reverb_enabled(&self) -> bool {
        self.enable_distance_attenuation_reverb
    }

    pub fn set_near_field_enabled(&mut self, enabled: bool) {
        self.enable_near_field = enabled;
    }

    // ---- Per-block inputs ----------------------------------------------------

    pub fn set_buffer(&mut self, block: &[Sample]) {
        if block.len() != self.internal_buffer.len() {
            au_core::report!(
                ResultId::BadSize,
                "source buffer does not match the configured block size"
            );
            return;
        }
        self.internal_buffer.copy_from_slice(block);
        self.ready_for_anechoic = true;
        self.ready_for_reverb = true;
    }

    pub fn buffer(&self) -> &[Sample] {
        &self.internal_buffer
    }

    pub fn set_source_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn source_transform(&self) -> &Transform {
        &self.transform
    }

    pub fn is_anechoic_ready(&self) -> bool {
        self.ready_for_anechoic
    }

    pub fn is_reverb_ready(&self) -> bool {
        self.ready_for_reverb
    }

    pub fn set_reverb_not_ready(&mut self) {
        self.ready_for_reverb = false;
    }

    pub fn coordinates(&self) -> &SourceCoordinates {
        &self.coordinates
    }

    pub fn ear_azimuth(&self, ear: Ear) -> f32 {
        match ear {
            Ear::Left => self.coordinates.left_azimuth,
            Ear::Right => self.coordinates.right_azimuth,
            _ => 0.0,
        }
    }

    pub fn ear_elevation(&self, ear: Ear) -> f32 {
        match ear {
            Ear::Left => self.coordinates.left_elevation,
            Ear::Right => self.coordinates.right_elevation,
            _ => 0.0,
        }
    }

    /// Reset convolver and delay state; called on audio-state changes and
    /// HRTF reloads.
    pub fn reset_buffers(&mut self, num_subfilters: usize, subfilter_len: usize) {
        let block = self.internal_buffer.len();
        self.upc = EarPair::new(
            UpcConvolver::new(block, num_subfilters),
            UpcConvolver::new(block, num_subfilters),
        );
        let make_scratch = || vec![vec![0.0; subfilter_len]; num_subfilters];
        self.hrir_scratch = EarPair::new(make_scratch(), make_scratch());
        self.delay_carry.left.clear();
        self.delay_carry.right.clear();
        self.near_field_filters.left.reset();
        self.near_field_filters.right.reset();
        self.ild_filters.left.reset();
        self.ild_filters.right.reset();
        self.attenuation_state_anechoic = 1.0;
        self.attenuation_state_reverb = 1.0;
    }

    // ---- Geometry ------------------------------------------------------------

    /// Recompute every angle the block needs from the listener's and the
    /// source's current transforms.
    pub fn calculate_coordinates(&mut self, listener: &Listener, measurement_distance: f32) {
        let vector_to_listener = listener.transform().vector_to(&self.transform);
        self.coordinates.distance = vector_to_listener.magnitude();
        if self.coordinates.distance <= EPSILON_DISTANCE {
            return;
        }

        for (ear, store_ear) in [(Ear::Left, StoreEar::Left), (Ear::Right, StoreEar::Right)] {
            let vector_to_ear = listener.ear_transform(ear).vector_to(&self.transform);
            let projection = sphere_projection(
                vector_to_ear,
                listener.ear_local_position(ear),
                measurement_distance,
            );
            let azimuth = projection.azimuth_degrees();
            let elevation = projection.elevation_degrees();
            match store_ear {
                StoreEar::Left => {
                    self.coordinates.left_azimuth = azimuth;
                    self.coordinates.left_elevation = elevation;
                }
                StoreEar::Right => {
                    self.coordinates.right_azimuth = azimuth;
                    self.coordinates.right_elevation = elevation;
                }
            }
        }

        self.coordinates.center_azimuth = vector_to_listener.azimuth_degrees();
        self.coordinates.center_elevation = vector_to_listener.elevation_degrees();
        self.coordinates.interaural_azimuth_deg = vector_to_listener.interaural_azimuth_degrees();
        self.coordinates.angle_to_forward_axis_rad =
            vector_to_listener.angle_to_forward_axis_radians();
    }

    // ---- Anechoic processing -------------------------------------------------

    pub fn process_anechoic(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        let block = ctx.audio_state.block_size;
        if out_left.len() != block || out_right.len() != block {
            au_core::report!(
                ResultId::BadSize,
                "anechoic output buffers must match the block size"
            );
            out_left.fill(0.0);
            out_right.fill(0.0);
            return;
        }
        if !self.enable_anechoic {
            out_left.fill(0.0);
            out_right.fill(0.0);
            return;
        }
        if !self.ready_for_anechoic {
            au_core::report!(
                ResultId::Warning,
                "anechoic process without a fresh source buffer",
                "call SetBuffer before ProcessAnechoic"
            );
        }

        self.calculate_coordinates(ctx.listener, ctx.listener.hrtf().measurement_distance());

        // A source inside the head is monitored unprocessed on both ears.
        if self.coordinates.distance <= ctx.listener.head_radius() {
            out_left.copy_from_slice(&self.internal_buffer);
            out_right.copy_from_slice(&self.internal_buffer);
            self.ready_for_anechoic = false;
            return;
        }

        self.work.copy_from_slice(&self.internal_buffer);

        if self.enable_far_distance {
            self.process_far_distance(ctx);
        }
        if self.enable_distance_attenuation_anechoic {
            let gain = ctx
                .magnitudes
                .anechoic_distance_gain(self.coordinates.distance);
            buffer::apply_gain_exponentially(
                &mut self.work,
                &mut self.attenuation_state_anechoic,
                gain,
                au_core::magnitudes::ATTACK_TIME_DISTANCE_ATTENUATION_MS,
                ctx.audio_state.sample_rate,
            );
        }

        match self.mode {
            SpatializationMode::HighQuality => {
                self.process_hrtf(ctx, out_left, out_right);
                self.process_near_field(ctx, out_left, out_right);
            }
            SpatializationMode::HighPerformance => {
                out_left.copy_from_slice(&self.work);
                out_right.copy_from_slice(&self.work);
                self.process_ild_spatialization(ctx, out_left, out_right);
            }
            SpatializationMode::NoSpatialization => {
                out_left.copy_from_slice(&self.work);
                out_right.copy_from_slice(&self.work);
            }
        }

        self.process_directionality(ctx, out_left, out_right);
        self.ready_for_anechoic = false;
    }

    /// Interleaved-output variant.
    pub fn process_anechoic_interlaced(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
        stereo_out: &mut [Sample],
    ) {
        self.process_anechoic(ctx, out_left, out_right);
        buffer::interlace(out_left, out_right, stereo_out);
    }

    fn process_far_distance(&mut self, ctx: &SpatialContext<'_>) {
        let distance = self.coordinates.distance;
        if distance <= FAR_DISTANCE_THRESHOLD_M {
            return;
        }
        // Cutoff falls linearly from 20 kHz at the threshold down to 2 kHz
        // at 100 m.
        let span = (distance - FAR_DISTANCE_THRESHOLD_M) / (100.0 - FAR_DISTANCE_THRESHOLD_M);
        let cutoff = (20_000.0 - span.clamp(0.0, 1.0) * 18_000.0) as f64;
        self.far_distance_filter.set_coeffs(BiquadCoeffs::lowpass(
            cutoff,
            std::f64::consts::FRAC_1_SQRT_2,
            ctx.audio_state.sample_rate as f64,
        ));
        self.far_distance_filter.process(&mut self.work);
    }

    fn process_hrtf(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        let hrtf = ctx.listener.hrtf();
        if !hrtf.is_loaded() {
            au_core::report!(
                ResultId::NotSet,
                "HRTF has not been loaded yet",
                "load and EndSetup the HRTF before spatializing"
            );
            out_left.fill(0.0);
            out_right.fill(0.0);
            return;
        }

        let interpolate = self.enable_interpolation;
        hrtf.hrir_partitioned_into(
            StoreEar::Left,
            self.coordinates.left_azimuth,
            self.coordinates.left_elevation,
            interpolate,
            &mut self.hrir_scratch.left,
        );
        hrtf.hrir_partitioned_into(
            StoreEar::Right,
            self.coordinates.right_azimuth,
            self.coordinates.right_elevation,
            interpolate,
            &mut self.hrir_scratch.right,
        );

        let (left_delay, right_delay) = if ctx.listener.is_custom_itd_enabled() {
            (
                hrtf.customized_delay(
                    self.coordinates.center_azimuth,
                    self.coordinates.center_elevation,
                    StoreEar::Left,
                    ctx.listener.head_radius(),
                    ctx.audio_state.sample_rate,
                    ctx.magnitudes.sound_speed,
                ) as usize,
                hrtf.customized_delay(
                    self.coordinates.center_azimuth,
                    self.coordinates.center_elevation,
                    StoreEar::Right,
                    ctx.listener.head_radius(),
                    ctx.audio_state.sample_rate,
                    ctx.magnitudes.sound_speed,
                ) as usize,
            )
        } else {
            (
                hrtf.hrir_delay(
                    StoreEar::Left,
                    self.coordinates.center_azimuth,
                    self.coordinates.center_elevation,
                    interpolate,
                ) as usize,
                hrtf.hrir_delay(
                    StoreEar::Right,
                    self.coordinates.center_azimuth,
                    self.coordinates.center_elevation,
                    interpolate,
                ) as usize,
            )
        };

        self.upc.left.process(
            &self.work,
            &self.hrir_scratch.left,
            &mut self.channel_scratch.left,
        );
        self.upc.right.process(
            &self.work,
            &self.hrir_scratch.right,
            &mut self.channel_scratch.right,
        );

        add_delay_expansion(
            &self.channel_scratch.left,
            out_left,
            &mut self.delay_carry.left,
            left_delay.min(ctx.audio_state.block_size - 1),
        );
        add_delay_expansion(
            &self.channel_scratch.right,
            out_right,
            &mut self.delay_carry.right,
            right_delay.min(ctx.audio_state.block_size - 1),
        );
    }

    fn process_near_field(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        if !self.enable_near_field
            || self.coordinates.distance > NEAR_FIELD_DISTANCE_THRESHOLD_M
        {
            return;
        }
        let ild = ctx.listener.ild();
        for (ear, chain, out) in [
            (Ear::Left, &mut self.near_field_filters.left, out_left),
            (Ear::Right, &mut self.near_field_filters.right, out_right),
        ] {
            if let Some(sections) = ild.near_field_coefficients(
                ear,
                self.coordinates.distance,
                self.coordinates.interaural_azimuth_deg,
            ) {
                for (i, raw) in sections.iter().enumerate() {
                    if let Some(filter) = chain.filter_mut(i) {
                        filter.set_coeffs(BiquadCoeffs::from_raw(*raw));
                    }
                }
                chain.process(out);
            }
        }
    }

    fn process_ild_spatialization(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        let distance = self
            .coordinates
            .distance
            .min(NEAR_FIELD_DISTANCE_THRESHOLD_M);
        let ild = ctx.listener.ild();
        let gain = 10f32.powf(ILD_ATTENUATION_DB / 20.0);
        for (ear, chain, out) in [
            (Ear::Left, &mut self.ild_filters.left, &mut *out_left),
            (Ear::Right, &mut self.ild_filters.right, &mut *out_right),
        ] {
            if let Some(sections) = ild.spatialization_coefficients(
                ear,
                distance,
                self.coordinates.interaural_azimuth_deg,
            ) {
                for (i, raw) in sections.iter().enumerate() {
                    if let Some(filter) = chain.filter_mut(i) {
                        filter.set_coeffs(BiquadCoeffs::from_raw(*raw));
                    }
                }
                chain.process(out);
            }
            buffer::apply_gain(out, gain);
        }

        if ctx.listener.is_custom_itd_enabled() {
            let hrtf = ctx.listener.hrtf();
            let block = ctx.audio_state.block_size;
            for (store_ear, azimuth, elevation, carry, out) in [
                (
                    StoreEar::Left,
                    self.coordinates.left_azimuth,
                    self.coordinates.left_elevation,
                    &mut self.delay_carry.left,
                    &mut *out_left,
                ),
                (
                    StoreEar::Right,
                    self.coordinates.right_azimuth,
                    self.coordinates.right_elevation,
                    &mut self.delay_carry.right,
                    &mut *out_right,
                ),
            ] {
                let delay = hrtf.customized_delay(
                    azimuth,
                    elevation,
                    store_ear,
                    ctx.listener.head_radius(),
                    ctx.audio_state.sample_rate,
                    ctx.magnitudes.sound_speed,
                ) as usize;
                self.work.copy_from_slice(out);
                add_delay_expansion(&self.work, out, carry, delay.min(block - 1));
            }
        }
    }

    fn process_directionality(
        &mut self,
        ctx: &SpatialContext<'_>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        let angle = self.coordinates.angle_to_forward_axis_rad;
        for (ear, out) in [(Ear::Left, &mut *out_left), (Ear::Right, &mut *out_right)] {
            if ctx.listener.is_directionality_enabled(ear) {
                let extension = ctx.listener.anechoic_directionality_extension_db(ear);
                buffer::apply_gain(out, directionality_linear_attenuation(extension, angle));
            }
        }
    }

    /// Prepare this source's contribution to the Ambisonic pipeline: the
    /// common distance stages plus the per-ear expansion-delay ITD and the
    /// near-field correction, leaving one block per ear ready for encoding.
    /// Returns false when the source is inside the listener's head or the
    /// anechoic path is disabled.
    pub fn prepare_ambisonic_feed(
        &mut self,
        ctx: &SpatialContext<'_>,
        feed_left: &mut [Sample],
        feed_right: &mut [Sample],
    ) -> bool {
        if !self.enable_anechoic {
            return false;
        }
        self.calculate_coordinates(ctx.listener, ctx.listener.hrtf().measurement_distance());
        if self.coordinates.distance <= ctx.listener.head_radius() {
            return false;
        }

        self.work.copy_from_slice(&self.internal_buffer);
        if self.enable_far_distance {
            self.process_far_distance(ctx);
        }
        if self.enable_distance_attenuation_anechoic {
            let gain = ctx
                .magnitudes
                .anechoic_distance_gain(self.coordinates.distance);
            buffer::apply_gain_exponentially(
                &mut self.work,
                &mut self.attenuation_state_anechoic,
                gain,
                au_core::magnitudes::ATTACK_TIME_DISTANCE_ATTENUATION_MS,
                ctx.audio_state.sample_rate,
            );
        }

        // Per-ear ITD, evaluated at each ear's own direction.
        let hrtf = ctx.listener.hrtf();
        let block = ctx.audio_state.block_size;
        for (store_ear, azimuth, elevation, carry, out) in [
            (
                StoreEar::Left,
                self.coordinates.left_azimuth,
                self.coordinates.left_elevation,
                &mut self.delay_carry.left,
                &mut *feed_left,
            ),
            (
                StoreEar::Right,
                self.coordinates.right_azimuth,
                self.coordinates.right_elevation,
                &mut self.delay_carry.right,
                &mut *feed_right,
            ),
        ] {
            let delay = if ctx.listener.is_custom_itd_enabled() {
                hrtf.customized_delay(
                    azimuth,
                    elevation,
                    store_ear,
                    ctx.listener.head_radius(),
                    ctx.audio_state.sample_rate,
                    ctx.magnitudes.sound_speed,
                ) as usize
            } else {
                hrtf.hrir_delay(store_ear, azimuth, elevation, self.enable_interpolation) as usize
            };
            add_delay_expansion(&self.work, out, carry, delay.min(block - 1));
        }

        self.process_near_field(ctx, feed_left, feed_right);
        self.ready_for_anechoic = false;
        true
    }

    // ---- Reverb-side hooks ---------------------------------------------------

    /// Apply the reverb-path distance attenuation to a copy of the source
    /// buffer, keeping the per-source smoothing state here.
    pub fn apply_reverb_distance_attenuation(
        &mut self,
        ctx: &SpatialContext<'_>,
        block: &mut [Sample],
    ) {
        if !self.enable_distance_attenuation_reverb {
            return;
        }
        let gain = ctx
            .magnitudes
            .reverb_distance_gain(self.coordinates.distance.max(EPSILON_DISTANCE));
        buffer::apply_gain_exponentially(
            block,
            &mut self.attenuation_state_reverb,
            gain,
            au_core::magnitudes::ATTACK_TIME_DISTANCE_ATTENUATION_MS,
            ctx.audio_state.sample_rate,
        );
    }
}

/// Apply an integer delay that may change between blocks without clicks.
///
/// When the requested delay differs from the carried one, the block is
/// resampled by the factor `(L-1) / (L-1 + delta)` so the transition is a
/// smooth time stretch rather than a jump; the carry buffer holds the tail
/// that belongs to the next block.
pub fn add_delay_expansion(
    input: &[Sample],
    output: &mut [Sample],
    carry: &mut Vec<Sample>,
    new_delay: usize,
) {
    debug_assert_eq!(input.len(), output.len());
    let len = input.len();
    let old_delay = carry.len();

    output[..old_delay].copy_from_slice(carry);

    if new_delay == old_delay {
        // Steady state: shift by the constant delay.
        let mut j = 0;
        for value in output.iter_mut().take(len).skip(old_delay) {
            *value = input[j];
            j += 1;
        }
        carry.clear();
        carry.extend_from_slice(&input[len - new_delay..]);
        return;
    }

    let numerator = (len - 1) as f32;
    let denominator = (len - 1 + new_delay) as f32 - old_delay as f32;
    let compression = numerator / denominator;
    let mut position = 0.0f32;

    let loop_end = if new_delay == 0 { len - 1 } else { len };
    for i in old_delay..loop_end {
        let j = position as usize;
        let rest = position - j as f32;
        let next = input[(j + 1).min(len - 1)];
        output[i] = input[j] * (1.0 - rest) + next * rest;
        position += compression;
    }

    if new_delay == 0 {
        output[len - 1] = input[len - 1];
        carry.clear();
    } else {
        carry.clear();
        for _ in 0..new_delay.saturating_sub(1) {
            let j = position as usize;
            let rest = position - j as f32;
            let next = input[(j + 1).min(len - 1)];
            carry.push(input[j] * (1.0 - rest) + next * rest);
            position += compression;
        }
        carry.push(input[len - 1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_constant_delay() {
        let mut carry = Vec::new();
        let mut out = vec![0.0; 8];
        // First call ramps into the delay
        add_delay_expansion(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &mut out, &mut carry, 2);
        assert_eq!(carry.len(), 2);
        // Second call with the same delay: a plain two-sample shift
        add_delay_expansion(
            &[9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0],
            &mut out,
            &mut carry,
            2,
        );
        assert_eq!(out[2], 9.0);
        assert_eq!(out[7], 14.0);
        assert_eq!(carry, vec![15.0, 16.0]);
    }

    #[test]
    fn test_expansion_zero_delay_is_identity() {
        let mut carry = Vec::new();
        let input: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut out = vec![0.0; 16];
        add_delay_expansion(&input, &mut out, &mut carry, 0);
        assert_eq!(out, input);
        assert!(carry.is_empty());
    }

    #[test]
    fn test_expansion_changing_delay_is_bounded() {
        // Under a delay change no output sample may exceed twice the input
        // peak.
        let input: Vec<f32> = (0..128)
            .map(|i| (std::f32::consts::TAU * i as f32 / 16.0).sin())
            .collect();
        let mut carry = Vec::new();
        let mut out = vec![0.0; 128];
        for delay in [0usize, 5, 12, 3, 20, 0, 7] {
            add_delay_expansion(&input, &mut out, &mut carry, delay);
            let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            assert!(peak <= 2.0, "peak {peak} at delay {delay}");
            assert_eq!(carry.len(), delay);
        }
    }

    #[test]
    fn test_expansion_continuity_across_blocks() {
        // A DC signal must stay DC through any delay schedule.
        let input = vec![1.0f32; 64];
        let mut carry = Vec::new();
        let mut out = vec![0.0; 64];
        add_delay_expansion(&input, &mut out, &mut carry, 10);
        add_delay_expansion(&input, &mut out, &mut carry, 10);
        for v in &out {
            assert!((v - 1.0).abs() < 1e-6);
        }
        add_delay_expansion(&input, &mut out, &mut carry, 20);
        for v in &out {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sphere_projection_on_axis() {
        // Ear at the origin-side, source straight ahead: the projection must
        // land on the sphere at the measurement radius.
        let ear = Vector3::new(0.0, 0.09, 0.0);
        let to_source = Vector3::new(2.0, -0.09, 0.0);
        let p = sphere_projection(to_source, ear, 1.95);
        assert!((p.magnitude() - 1.95).abs() < 1e-3);
        // And ahead of the ear, not behind
        assert!(p.x > 0.0);
    }
}
