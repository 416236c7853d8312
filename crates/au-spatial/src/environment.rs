//! Virtual-Ambisonic reverberation
//!
//! A six-speaker BRIR (north, south, east, west, zenith, nadir) is folded
//! into first-order Ambisonic binaural impulse responses (the ABIR). Per
//! block every reverb-enabled source is encoded into B-format channels at
//! its head-centred direction; each channel is convolved with its ABIR by a
//! partitioned convolver that stays in the frequency domain, the channels
//! are mixed per ear and a single inverse transform produces the stereo
//! reverb tail.

use au_core::{buffer, Ear, EarPair, ResultId, Sample};
use au_dsp::upc::{partition_ir, spectrum_len, PartitionedIr};
use au_dsp::{FftProcessor, UpcConvolver};

use crate::source::{SingleSourceDsp, SpatialContext};

/// First-order omni encoding weight.
pub const W_SCALE: f32 = 0.707_107;

/// Power equalization applied to W when the BRIR has no zenith/nadir data
/// (0D and 2D renditions, where X carries the missing-Z compensation).
pub const W_EQUALIZATION_WITHOUT_Z: f32 = 1.578_14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReverbOrder {
    Adimensional,
    Bidimensional,
    #[default]
    Threedimensional,
}

impl ReverbOrder {
    /// Number of B-format channels the order renders.
    pub fn channel_count(self) -> usize {
        match self {
            ReverbOrder::Adimensional => 1,
            ReverbOrder::Bidimensional => 3,
            ReverbOrder::Threedimensional => 4,
        }
    }
}

/// The six virtual loudspeakers of the BRIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualSpeaker {
    North,
    South,
    East,
    West,
    Zenith,
    Nadir,
}

impl VirtualSpeaker {
    pub const ALL: [VirtualSpeaker; 6] = [
        VirtualSpeaker::North,
        VirtualSpeaker::South,
        VirtualSpeaker::East,
        VirtualSpeaker::West,
        VirtualSpeaker::Zenith,
        VirtualSpeaker::Nadir,
    ];

    fn index(self) -> usize {
        match self {
            VirtualSpeaker::North => 0,
            VirtualSpeaker::South => 1,
            VirtualSpeaker::East => 2,
            VirtualSpeaker::West => 3,
            VirtualSpeaker::Zenith => 4,
            VirtualSpeaker::Nadir => 5,
        }
    }
}

/// B-format channel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BFormatChannel {
    W,
    X,
    Y,
    Z,
}

impl BFormatChannel {
    pub const ALL: [BFormatChannel; 4] = [
        BFormatChannel::W,
        BFormatChannel::X,
        BFormatChannel::Y,
        BFormatChannel::Z,
    ];

    fn index(self) -> usize {
        match self {
            BFormatChannel::W => 0,
            BFormatChannel::X => 1,
            BFormatChannel::Y => 2,
            BFormatChannel::Z => 3,
        }
    }
}

/// Partitioned BRIR store: one IR pair per virtual speaker.
#[derive(Debug, Default)]
pub struct Brir {
    speakers: [Option<EarPair<PartitionedIr>>; 6],
    ir_length: usize,
    num_subfilters: usize,
    block_size: usize,
    setup_in_progress: bool,
}

impl Brir {
    pub fn begin_setup(&mut self, ir_length: usize, block_size: usize) {
        self.speakers = Default::default();
        self.ir_length = ir_length;
        self.block_size = block_size;
        self.num_subfilters = ir_length.div_ceil(block_size).max(1);
        self.setup_in_progress = true;
    }

    pub fn add_impulse_response(
        &mut self,
        speaker: VirtualSpeaker,
        left: &[Sample],
        right: &[Sample],
    ) {
        if !self.setup_in_progress {
            au_core::report!(
                ResultId::NotAllowed,
                "AddImpulseResponse called outside BeginSetup/EndSetup"
            );
            return;
        }
        if left.len() != self.ir_length || right.len() != self.ir_length {
            au_core::report!(
                ResultId::BadSize,
                "BRIR length differs from the one given at BeginSetup"
            );
            return;
        }
        self.speakers[speaker.index()] = Some(EarPair::new(
            partition_ir(left, self.block_size),
            partition_ir(right, self.block_size),
        ));
    }

    pub fn end_setup(&mut self) -> bool {
        self.setup_in_progress = false;
        self.has_horizontal_ring()
    }

    pub fn num_subfilters(&self) -> usize {
        self.num_subfilters
    }

    fn speaker(&self, speaker: VirtualSpeaker) -> Option<&EarPair<PartitionedIr>> {
        self.speakers[speaker.index()].as_ref()
    }

    fn has_horizontal_ring(&self) -> bool {
        [
            VirtualSpeaker::North,
            VirtualSpeaker::South,
            VirtualSpeaker::East,
            VirtualSpeaker::West,
        ]
        .iter()
        .all(|s| self.speakers[s.index()].is_some())
    }

    fn has_vertical_pair(&self) -> bool {
        self.speaker(VirtualSpeaker::Zenith).is_some()
            && self.speaker(VirtualSpeaker::Nadir).is_some()
    }
}

/// Ambisonic binaural impulse response: one partitioned IR pair per
/// B-format channel, enum-indexed.
#[derive(Debug, Default)]
pub struct Abir {
    channels: [Option<EarPair<PartitionedIr>>; 4],
}

impl Abir {
    pub fn channel(&self, channel: BFormatChannel) -> Option<&EarPair<PartitionedIr>> {
        self.channels[channel.index()].as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.channels[0].is_some()
    }
}

pub struct Environment {
    order: ReverbOrder,
    brir: Brir,
    abir: Abir,
    block_size: usize,
    convolvers: [EarPair<UpcConvolver>; 4],
    fft: EarPair<FftProcessor>,
    // Encode buffers per channel and per ear spectrum accumulators
    encoded: [Vec<Sample>; 4],
    channel_spectrum: Vec<Sample>,
    mix_spectrum: EarPair<Vec<Sample>>,
    source_block: Vec<Sample>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("order", &self.order)
            .finish()
    }
}

impl Environment {
    pub fn new(block_size: usize) -> Self {
        let make_upc = |n| EarPair::new(UpcConvolver::new(block_size, n), UpcConvolver::new(block_size, n));
        Self {
            order: ReverbOrder::default(),
            brir: Brir::default(),
            abir: Abir::default(),
            block_size,
            convolvers: [make_upc(0), make_upc(0), make_upc(0), make_upc(0)],
            fft: EarPair::new(FftProcessor::new(2 * block_size), FftProcessor::new(2 * block_size)),
            encoded: [
                vec![0.0; block_size],
                vec![0.0; block_size],
                vec![0.0; block_size],
                vec![0.0; block_size],
            ],
            channel_spectrum: vec![0.0; spectrum_len(block_size)],
            mix_spectrum: EarPair::new(
                vec![0.0; spectrum_len(block_size)],
                vec![0.0; spectrum_len(block_size)],
            ),
            source_block: vec![0.0; block_size],
        }
    }

    pub fn set_reverb_order(&mut self, order: ReverbOrder) {
        self.order = order;
    }

    pub fn reverb_order(&self) -> ReverbOrder {
        self.order
    }

    pub fn brir_mut(&mut self) -> &mut Brir {
        &mut self.brir
    }

    pub fn abir(&self) -> &Abir {
        &self.abir
    }

    /// Fold the loaded BRIR into the ABIR for the current reverberation
    /// order. Fails (with a report) when required speakers are missing.
    pub fn set_abir(&mut self) -> bool {
        if !self.brir.has_horizontal_ring() {
            au_core::report!(
                ResultId::NotSet,
                "BRIR is missing one of the horizontal speakers",
                "load north, south, east and west before SetABIR"
            );
            return false;
        }
        let use_z = self.brir.has_vertical_pair();
        if self.order == ReverbOrder::Threedimensional && !use_z {
            au_core::report!(
                ResultId::NotSet,
                "three-dimensional reverb needs zenith and nadir BRIRs"
            );
            return false;
        }

        let north = self.brir.speaker(VirtualSpeaker::North).unwrap();
        let south = self.brir.speaker(VirtualSpeaker::South).unwrap();
        let east = self.brir.speaker(VirtualSpeaker::East).unwrap();
        let west = self.brir.speaker(VirtualSpeaker::West).unwrap();

        let subfilters = self.brir.num_subfilters();
        let slen = spectrum_len(self.block_size);
        let zeros = vec![vec![0.0; slen]; subfilters];

        let combine = |weights: &[(f32, &PartitionedIr)]| -> PartitionedIr {
            let mut out = vec![vec![0.0; slen]; subfilters];
            for (k, partition) in out.iter_mut().enumerate() {
                for (i, value) in partition.iter_mut().enumerate() {
                    *value = weights.iter().map(|(w, ir)| w * ir[k][i]).sum();
                }
            }
            out
        };

        let per_ear = |pick: fn(&EarPair<PartitionedIr>) -> &PartitionedIr| {
            let n = pick(north);
            let s = pick(south);
            let e = pick(east);
            let w = pick(west);
            let (zenith, nadir) = if use_z {
                (
                    pick(self.brir.speaker(VirtualSpeaker::Zenith).unwrap()),
                    pick(self.brir.speaker(VirtualSpeaker::Nadir).unwrap()),
                )
            } else {
                (&zeros, &zeros)
            };

            let w_weight = if use_z {
                W_SCALE
            } else {
                W_SCALE * W_EQUALIZATION_WITHOUT_Z
            };
            let w_channel = combine(&[
                (w_weight, n),
                (w_weight, s),
                (w_weight, e),
                (w_weight, w),
                (W_SCALE, zenith),
                (W_SCALE, nadir),
            ]);
            let x_channel = combine(&[(1.0, n), (-1.0, s)]);
            let y_channel = combine(&[(1.0, w), (-1.0, e)]);
            let z_channel = if use_z {
                Some(combine(&[(1.0, zenith), (-1.0, nadir)]))
            } else {
                None
            };
            (w_channel, x_channel, y_channel, z_channel)
        };

        let (wl, xl, yl, zl) = per_ear(|p| &p.left);
        let (wr, xr, yr, zr) = per_ear(|p| &p.right);

        self.abir.channels[BFormatChannel::W.index()] = Some(EarPair::new(wl, wr));
        self.abir.channels[BFormatChannel::X.index()] = Some(EarPair::new(xl, xr));
        self.abir.channels[BFormatChannel::Y.index()] = Some(EarPair::new(yl, yr));
        self.abir.channels[BFormatChannel::Z.index()] = match (zl, zr) {
            (Some(l), Some(r)) => Some(EarPair::new(l, r)),
            _ => None,
        };

        // Fresh convolvers sized for the new subfilter count.
        for channel in &mut self.convolvers {
            *channel = EarPair::new(
                UpcConvolver::new(self.block_size, subfilters),
                UpcConvolver::new(self.block_size, subfilters),
            );
        }
        true
    }

    /// Render the reverb tail of every reverb-enabled source into a stereo
    /// pair. Sources read their input buffers only; anechoic outputs are
    /// untouched.
    pub fn process_virtual_ambisonic_reverb<'a>(
        &mut self,
        ctx: &SpatialContext<'_>,
        sources: impl IntoIterator<Item = &'a mut SingleSourceDsp>,
        out_left: &mut [Sample],
        out_right: &mut [Sample],
    ) {
        out_left.fill(0.0);
        out_right.fill(0.0);
        if !self.abir.is_initialized() {
            au_core::report!(
                ResultId::NotInitialized,
                "reverb process before SetABIR",
                "load a BRIR and call SetABIR first"
            );
            return;
        }

        let channel_count = self.order.channel_count();
        for encoded in self.encoded.iter_mut().take(channel_count) {
            encoded.fill(0.0);
        }

        let mut any_source = false;
        for source in sources {
            if !source.is_reverb_enabled() {
                continue;
            }
            if !source.is_reverb_ready() {
                au_core::report!(
                    ResultId::Warning,
                    "reverb process without a fresh source buffer",
                    "call SetBuffer before ProcessVirtualAmbisonicReverb"
                );
                continue;
            }

            source.calculate_coordinates(ctx.listener, ctx.listener.hrtf().measurement_distance());
            let coordinates = *source.coordinates();
            if coordinates.distance < ctx.listener.head_radius() {
                continue;
            }
            any_source = true;

            self.source_block.copy_from_slice(source.buffer());
            source.apply_reverb_distance_attenuation(ctx, &mut self.source_block);

            let azimuth = coordinates.center_azimuth.to_radians();
            let mut elevation = coordinates.center_elevation;
            if elevation >= 270.0 {
                elevation -= 360.0;
            }
            let elevation = elevation.to_radians();

            let cos_elevation = elevation.cos();
            let (x_weight, y_weight, z_weight);
            match self.order {
                ReverbOrder::Adimensional => {
                    x_weight = 0.0;
                    y_weight = 0.0;
                    z_weight = 0.0;
                }
                ReverbOrder::Bidimensional => {
                    // The missing Z channel is compensated with extra power
                    // on X, proportional to how far the source leaves the
                    // horizontal plane.
                    x_weight = azimuth.cos() * cos_elevation + elevation.sin().abs();
                    y_weight = azimuth.sin() * cos_elevation;
                    z_weight = 0.0;
                }
                ReverbOrder::Threedimensional => {
                    x_weight = azimuth.cos() * cos_elevation;
                    y_weight = azimuth.sin() * cos_elevation;
                    z_weight = elevation.sin();
                }
            }

            for (i, s) in self.source_block.iter().enumerate() {
                self.encoded[0][i] += s * W_SCALE;
                if channel_count > 1 {
                    self.encoded[1][i] += s * x_weight;
                    self.encoded[2][i] += s * y_weight;
                }
                if channel_count > 3 {
                    self.encoded[3][i] += s * z_weight;
                }
            }

            source.set_reverb_not_ready();
        }
        if !any_source {
            return;
        }

        // Frequency-domain convolution and per-ear mix; one IFFT per ear.
        self.mix_spectrum.left.fill(0.0);
        self.mix_spectrum.right.fill(0.0);
        for (index, channel) in BFormatChannel::ALL.iter().take(channel_count).enumerate() {
            let Some(abir) = self.abir.channels[channel.index()].as_ref() else {
                continue;
            };
            let convolvers = &mut self.convolvers[index];
            convolvers.left.process_without_ifft(
                &self.encoded[index],
                &abir.left,
                &mut self.channel_spectrum,
            );
            for (m, v) in self
                .mix_spectrum
                .left
                .iter_mut()
                .zip(self.channel_spectrum.iter())
            {
                *m += *v;
            }
            convolvers.right.process_without_ifft(
                &self.encoded[index],
                &abir.right,
                &mut self.channel_spectrum,
            );
            for (m, v) in self
                .mix_spectrum
                .right
                .iter_mut()
                .zip(self.channel_spectrum.iter())
            {
                *m += *v;
            }
        }

        self.fft.left.ifft_second_half(&self.mix_spectrum.left, out_left);
        self.fft
            .right
            .ifft_second_half(&self.mix_spectrum.right, out_right);

        // Hearing-aid directionality on the reverb path.
        for (ear, out) in [(Ear::Left, &mut *out_left), (Ear::Right, &mut *out_right)] {
            if ctx.listener.is_directionality_enabled(ear) {
                buffer::apply_gain(out, ctx.listener.reverb_directionality_gain(ear));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;
    use au_core::{AudioState, Magnitudes, Transform, Vector3};

    fn delta(len: usize) -> Vec<f32> {
        let mut d = vec![0.0; len];
        d[0] = 1.0;
        d
    }

    fn environment_with_delta_brir(block: usize, with_vertical: bool) -> Environment {
        let mut env = Environment::new(block);
        env.brir_mut().begin_setup(block, block);
        let speakers: &[VirtualSpeaker] = if with_vertical {
            &VirtualSpeaker::ALL
        } else {
            &VirtualSpeaker::ALL[..4]
        };
        for s in speakers {
            let d = delta(block);
            env.brir_mut().add_impulse_response(*s, &d, &d);
        }
        env.brir_mut().end_setup();
        env
    }

    #[test]
    fn test_abir_fold_with_vertical_pair() {
        let mut env = environment_with_delta_brir(64, true);
        env.set_reverb_order(ReverbOrder::Threedimensional);
        assert!(env.set_abir());
        // W = 0.707 * (sum of six deltas): DC bin of partition 0 is 6*0.707
        let w = env.abir().channel(BFormatChannel::W).unwrap();
        assert!((w.left[0][0] - 6.0 * W_SCALE).abs() < 1e-3);
        // X = N - S = 0, Z = zenith - nadir = 0 for identical deltas
        let x = env.abir().channel(BFormatChannel::X).unwrap();
        assert!(x.left[0].iter().all(|v| v.abs() < 1e-6));
        let z = env.abir().channel(BFormatChannel::Z).unwrap();
        assert!(z.left[0].iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_abir_without_vertical_equalizes_w() {
        let mut env = environment_with_delta_brir(64, false);
        env.set_reverb_order(ReverbOrder::Bidimensional);
        assert!(env.set_abir());
        let w = env.abir().channel(BFormatChannel::W).unwrap();
        let expected = 4.0 * W_SCALE * W_EQUALIZATION_WITHOUT_Z;
        assert!((w.left[0][0] - expected).abs() < 1e-2);
        // 3D demands the vertical pair
        env.set_reverb_order(ReverbOrder::Threedimensional);
        assert!(!env.set_abir());
    }

    #[test]
    fn test_adimensional_reverb_is_w_convolution() {
        let block = 128;
        let mut env = environment_with_delta_brir(block, true);
        env.set_reverb_order(ReverbOrder::Adimensional);
        assert!(env.set_abir());

        let listener = Listener::new(0.0875, block);
        let audio_state = AudioState::new(44_100, block).unwrap();
        let magnitudes = Magnitudes::default();
        let ctx = SpatialContext {
            audio_state,
            magnitudes: &magnitudes,
            listener: &listener,
        };

        let mut source = SingleSourceDsp::new(audio_state, 1, spectrum_len(block));
        source.set_source_transform(Transform::from_position(Vector3::new(0.5, 0.0, 0.0)));
        source.set_distance_attenuation_reverb(false);
        let input: Vec<f32> = (0..block).map(|i| (i as f32 * 0.1).sin()).collect();
        source.set_buffer(&input);

        let mut out_left = vec![0.0; block];
        let mut out_right = vec![0.0; block];
        env.process_virtual_ambisonic_reverb(
            &ctx,
            std::iter::once(&mut source),
            &mut out_left,
            &mut out_right,
        );

        // W BIR is 6 * 0.707 * delta; the encoder adds another 0.707.
        let expected_gain = W_SCALE * 6.0 * W_SCALE;
        for (o, i) in out_left.iter().zip(input.iter()) {
            assert!((o - i * expected_gain).abs() < 1e-3, "{o} vs {i}");
        }
        assert!(!source.is_reverb_ready());
    }

    #[test]
    fn test_reverb_without_abir_reports_and_zeroes() {
        let block = 64;
        let mut env = Environment::new(block);
        let listener = Listener::new(0.0875, block);
        let audio_state = AudioState::new(44_100, block).unwrap();
        let magnitudes = Magnitudes::default();
        let ctx = SpatialContext {
            audio_state,
            magnitudes: &magnitudes,
            listener: &listener,
        };
        let mut out_left = vec![1.0; block];
        let mut out_right = vec![1.0; block];
        env.process_virtual_ambisonic_reverb(
            &ctx,
            std::iter::empty(),
            &mut out_left,
            &mut out_right,
        );
        assert!(out_left.iter().all(|s| *s == 0.0));
        assert!(out_right.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_source_inside_head_skipped() {
        let block = 64;
        let mut env = environment_with_delta_brir(block, true);
        env.set_reverb_order(ReverbOrder::Adimensional);
        env.set_abir();

        let listener = Listener::new(0.0875, block);
        let audio_state = AudioState::new(44_100, block).unwrap();
        let magnitudes = Magnitudes::default();
        let ctx = SpatialContext {
            audio_state,
            magnitudes: &magnitudes,
            listener: &listener,
        };
        let mut source = SingleSourceDsp::new(audio_state, 1, spectrum_len(block));
        source.set_source_transform(Transform::from_position(Vector3::new(0.01, 0.0, 0.0)));
        source.set_buffer(&vec![1.0; block]);

        let mut out_left = vec![0.0; block];
        let mut out_right = vec![0.0; block];
        env.process_virtual_ambisonic_reverb(
            &ctx,
            std::iter::once(&mut source),
            &mut out_left,
            &mut out_right,
        );
        assert!(out_left.iter().all(|s| *s == 0.0));
    }
}
