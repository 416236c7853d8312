//! Core orchestrator
//!
//! Owns the audio state, the listener, every source and the optional
//! environment, Ambisonic, image-source and hearing stages, and drives one
//! `process_all` per block. Sources are addressed by integer ids and borrow
//! read-only views of the shared state while processing; the block path
//! takes no locks, and only the image-source expansion touches the heap
//! (when a rebuilt tree births new reflections).
//!
//! Block ordering: per-source anechoic output (including the image-source
//! virtual sources) is computed first, then the reverb path reads the same
//! input buffers, the two are summed, and the hearing-aid and hearing-loss
//! stages shape the stereo sum last.

use std::collections::HashMap;

use au_core::{buffer, AudioState, EarPair, Magnitudes, ResultId, Sample};
use au_hearing::{HearingAidSim, HearingLossSim};
use au_room::IsmEngine;

use crate::ambisonic::{AmbisonicDsp, AmbisonicNormalization, AmbisonicOrder};
use crate::environment::Environment;
use crate::listener::Listener;
use crate::source::{SingleSourceDsp, SpatialContext, SpatializationMode};

/// Handle to a source owned by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

pub struct Core {
    audio_state: AudioState,
    magnitudes: Magnitudes,
    listener: Option<Listener>,
    sources: HashMap<u64, SingleSourceDsp>,
    next_source_id: u64,
    environments: Vec<Environment>,
    ambisonic: Option<AmbisonicDsp>,
    ism: IsmEngine,
    ism_enabled: bool,
    /// Persistent DSP state per image-source node, keyed by
    /// (source id, node index). Entries appear when a tree is rebuilt,
    /// which happens on control-path updates.
    ism_pool: HashMap<(u64, usize), SingleSourceDsp>,
    hearing_aid: HearingAidSim,
    hearing_loss: HearingLossSim,
    // Block work buffers
    mix: EarPair<Vec<Sample>>,
    stage: EarPair<Vec<Sample>>,
    source_out: EarPair<Vec<Sample>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("audio_state", &self.audio_state)
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl Core {
    pub fn new(audio_state: AudioState) -> Self {
        let block = audio_state.block_size;
        Self {
            audio_state,
            magnitudes: Magnitudes::default(),
            listener: None,
            sources: HashMap::new(),
            next_source_id: 0,
            environments: Vec::new(),
            ambisonic: None,
            ism: IsmEngine::new(audio_state),
            ism_enabled: false,
            ism_pool: HashMap::new(),
            hearing_aid: HearingAidSim::default_config(audio_state.sample_rate, block),
            hearing_loss: HearingLossSim::new(audio_state.sample_rate, block, 100.0, 3),
            mix: EarPair::new(vec![0.0; block], vec![0.0; block]),
            stage: EarPair::new(vec![0.0; block], vec![0.0; block]),
            source_out: EarPair::new(vec![0.0; block], vec![0.0; block]),
        }
    }

    pub fn audio_state(&self) -> AudioState {
        self.audio_state
    }

    /// Change the audio state. Idempotent for an unchanged state; otherwise
    /// a full reset: the HRIR grid is rebuilt for the new block size, every
    /// source's convolver memory is cleared, image trees are dropped, and
    /// environment / Ambisonic stages must be recreated by the host.
    pub fn set_audio_state(&mut self, audio_state: AudioState) {
        if audio_state == self.audio_state {
            return;
        }
        self.audio_state = audio_state;
        let block = audio_state.block_size;

        if let Some(listener) = &mut self.listener {
            listener.hrtf_mut().rebuild(block);
        }
        let (subfilters, subfilter_len) = self.hrtf_dimensions();
        for source in self.sources.values_mut() {
            *source = SingleSourceDsp::new(audio_state, subfilters, subfilter_len);
        }
        self.environments.clear();
        self.ambisonic = None;
        self.ism = IsmEngine::new(audio_state);
        self.ism_pool.clear();
        self.hearing_aid = HearingAidSim::default_config(audio_state.sample_rate, block);
        self.hearing_loss = HearingLossSim::new(audio_state.sample_rate, block, 100.0, 3);
        self.mix = EarPair::new(vec![0.0; block], vec![0.0; block]);
        self.stage = EarPair::new(vec![0.0; block], vec![0.0; block]);
        self.source_out = EarPair::new(vec![0.0; block], vec![0.0; block]);
        au_core::report!(
            ResultId::Warning,
            "audio state changed: environments and Ambisonic stages were dropped",
            "recreate and reload them for the new block size"
        );
    }

    pub fn magnitudes(&self) -> &Magnitudes {
        &self.magnitudes
    }

    pub fn magnitudes_mut(&mut self) -> &mut Magnitudes {
        &mut self.magnitudes
    }

    // ---- Listener ------------------------------------------------------------

    pub fn create_listener(&mut self, head_radius_m: f32) -> &mut Listener {
        self.listener = Some(Listener::new(head_radius_m, self.audio_state.block_size));
        self.listener.as_mut().unwrap()
    }

    pub fn listener(&self) -> Option<&Listener> {
        self.listener.as_ref()
    }

    pub fn listener_mut(&mut self) -> Option<&mut Listener> {
        self.listener.as_mut()
    }

    fn hrtf_dimensions(&self) -> (usize, usize) {
        match &self.listener {
            Some(listener) => (
                listener.hrtf().num_subfilters(),
                listener.hrtf().subfilter_len(),
            ),
            None => (0, au_dsp::spectrum_len(self.audio_state.block_size)),
        }
    }

    /// Re-size every source's convolver state after an HRTF (re)load.
    /// Call once after `EndSetup`.
    pub fn refresh_source_buffers(&mut self) {
        let (subfilters, subfilter_len) = self.hrtf_dimensions();
        for source in self.sources.values_mut() {
            source.reset_buffers(subfilters, subfilter_len);
        }
        for source in self.ism_pool.values_mut() {
            source.reset_buffers(subfilters, subfilter_len);
        }
    }

    // ---- Sources -------------------------------------------------------------

    pub fn create_source(&mut self) -> SourceId {
        let (subfilters, subfilter_len) = self.hrtf_dimensions();
        let id = self.next_source_id;
        self.next_source_id += 1;
        self.sources.insert(
            id,
            SingleSourceDsp::new(self.audio_state, subfilters, subfilter_len),
        );
        SourceId(id)
    }

    pub fn remove_source(&mut self, id: SourceId) {
        self.sources.remove(&id.0);
        self.ism.remove_source(id.0);
        self.ism_pool.retain(|(source, _), _| *source != id.0);
    }

    pub fn source(&self, id: SourceId) -> Option<&SingleSourceDsp> {
        self.sources.get(&id.0)
    }

    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut SingleSourceDsp> {
        self.sources.get_mut(&id.0)
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    // ---- Stages --------------------------------------------------------------

    pub fn create_environment(&mut self) -> usize {
        self.environments
            .push(Environment::new(self.audio_state.block_size));
        self.environments.len() - 1
    }

    pub fn environment_mut(&mut self, index: usize) -> Option<&mut Environment> {
        self.environments.get_mut(index)
    }

    /// Install the Ambisonic rendering stage. While initialized, sources in
    /// high-quality mode render through it instead of per-source HRIR
    /// convolution.
    pub fn create_ambisonic_dsp(
        &mut self,
        order: AmbisonicOrder,
        normalization: AmbisonicNormalization,
    ) -> &mut AmbisonicDsp {
        self.ambisonic = Some(AmbisonicDsp::new(
            self.audio_state.block_size,
            order,
            normalization,
        ));
        self.ambisonic.as_mut().unwrap()
    }

    pub fn ambisonic_mut(&mut self) -> Option<&mut AmbisonicDsp> {
        self.ambisonic.as_mut()
    }

    pub fn ism_mut(&mut self) -> &mut IsmEngine {
        &mut self.ism
    }

    pub fn set_ism_enabled(&mut self, enabled: bool) {
        self.ism_enabled = enabled;
    }

    pub fn hearing_aid_mut(&mut self) -> &mut HearingAidSim {
        &mut self.hearing_aid
    }

    pub fn hearing_loss_mut(&mut self) -> &mut HearingLossSim {
        &mut self.hearing_loss
    }

    // ---- Block processing ----------------------------------------------------

    /// Feed one block for a set of sources and render. Equivalent to calling
    /// `set_buffer` per source followed by [`Core::process_all`].
    pub fn process_all_with_inputs(
        &mut self,
        inputs: &[(SourceId, &[Sample])],
        stereo_out: &mut [Sample],
    ) {
        for (id, block) in inputs {
            if let Some(source) = self.sources.get_mut(&id.0) {
                source.set_buffer(block);
            }
        }
        self.process_all(stereo_out);
    }

    /// Render one block of every active source into an interleaved stereo
    /// buffer of `2 * block_size` samples.
    pub fn process_all(&mut self, stereo_out: &mut [Sample]) {
        let block = self.audio_state.block_size;
        if stereo_out.len() != 2 * block {
            au_core::report!(
                ResultId::BadSize,
                "stereo output must hold two interleaved channels per block"
            );
            stereo_out.fill(0.0);
            return;
        }
        let Some(listener) = &self.listener else {
            au_core::report!(
                ResultId::NotInitialized,
                "process_all without a listener",
                "call CreateListener first"
            );
            stereo_out.fill(0.0);
            return;
        };

        self.mix.left.fill(0.0);
        self.mix.right.fill(0.0);

        let ctx = SpatialContext {
            audio_state: self.audio_state,
            magnitudes: &self.magnitudes,
            listener,
        };

        // Image-source engine: expand each ready source into its virtual
        // reflections before the anechoic pass consumes the buffers.
        if self.ism_enabled {
            self.ism
                .set_listener_location(listener.transform().position);
            for (id, source) in self.sources.iter() {
                if !source.is_anechoic_ready() || !source.is_anechoic_enabled() {
                    continue;
                }
                self.ism
                    .set_source_location(*id, source.source_transform().position);
                let virtual_sources = self.ism.process(*id, source.buffer());
                for vs in virtual_sources {
                    let dsp = self
                        .ism_pool
                        .entry((*id, vs.node_index))
                        .or_insert_with(|| {
                            let (subfilters, subfilter_len) = match &self.listener {
                                Some(l) => {
                                    (l.hrtf().num_subfilters(), l.hrtf().subfilter_len())
                                }
                                None => (0, au_dsp::spectrum_len(block)),
                            };
                            SingleSourceDsp::new(self.audio_state, subfilters, subfilter_len)
                        });
                    dsp.set_source_transform(au_core::Transform::from_position(vs.location));
                    dsp.set_buffer(&vs.buffer);
                    dsp.process_anechoic(
                        &ctx,
                        &mut self.source_out.left,
                        &mut self.source_out.right,
                    );
                    add_into(&mut self.mix, &self.source_out);
                }
            }
        }

        // Anechoic pass. With an initialized Ambisonic stage, high-quality
        // sources render collectively through it; everything else renders
        // per source.
        let ambisonic_active = self
            .ambisonic
            .as_ref()
            .map(|a| a.is_initialized())
            .unwrap_or(false);

        for source in self.sources.values_mut() {
            if !source.is_anechoic_ready() || !source.is_anechoic_enabled() {
                continue;
            }
            if ambisonic_active
                && source.spatialization_mode() == SpatializationMode::HighQuality
            {
                continue;
            }
            source.process_anechoic(&ctx, &mut self.source_out.left, &mut self.source_out.right);
            add_into(&mut self.mix, &self.source_out);
        }

        if let Some(ambisonic) = &mut self.ambisonic {
            if ambisonic.is_initialized() {
                ambisonic.process_virtual_ambisonic_anechoic(
                    &ctx,
                    self.sources.values_mut().filter(|s| {
                        s.spatialization_mode() == SpatializationMode::HighQuality
                            && s.is_anechoic_enabled()
                            && s.is_anechoic_ready()
                    }),
                    &mut self.source_out.left,
                    &mut self.source_out.right,
                );
                add_into(&mut self.mix, &self.source_out);
            }
        }

        // Reverb pass reads the input buffers, never the anechoic outputs.
        for environment in &mut self.environments {
            environment.process_virtual_ambisonic_reverb(
                &ctx,
                self.sources.values_mut(),
                &mut self.source_out.left,
                &mut self.source_out.right,
            );
            add_into(&mut self.mix, &self.source_out);
        }

        // Hearing-aid then hearing-loss shaping of the stereo sum.
        self.hearing_aid.process(&self.mix, &mut self.stage);
        self.hearing_loss.process(&self.stage, &mut self.mix);

        buffer::interlace(&self.mix.left, &self.mix.right, stereo_out);
    }
}

fn add_into(mix: &mut EarPair<Vec<Sample>>, add: &EarPair<Vec<Sample>>) {
    for (m, a) in mix.left.iter_mut().zip(add.left.iter()) {
        *m += a;
    }
    for (m, a) in mix.right.iter_mut().zip(add.right.iter()) {
        *m += a;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use au_core::{Transform, Vector3};

    #[test]
    fn test_process_without_listener_zeroes() {
        let mut core = Core::new(AudioState::new(44_100, 128).unwrap());
        let mut out = vec![1.0; 256];
        core.process_all(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_wrong_output_size_rejected() {
        let mut core = Core::new(AudioState::new(44_100, 128).unwrap());
        core.create_listener(0.0875);
        let mut out = vec![1.0; 100];
        core.process_all(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_no_spatialization_passthrough() {
        // Spatialization off, attenuation off, hearing stages off: the
        // input block appears on both channels.
        let state = AudioState::new(44_100, 128).unwrap();
        let mut core = Core::new(state);
        core.create_listener(0.0875);
        let id = core.create_source();
        {
            let source = core.source_mut(id).unwrap();
            source.set_spatialization_mode(SpatializationMode::NoSpatialization);
            source.set_distance_attenuation_anechoic(false);
            source.set_far_distance_enabled(false);
            source.set_reverb_enabled(false);
            source.set_source_transform(Transform::from_position(Vector3::new(1.0, 0.0, 0.0)));
        }
        let input: Vec<f32> = (0..128).map(|i| (i as f32 * 0.3).sin()).collect();
        let mut out = vec![0.0; 256];
        core.process_all_with_inputs(&[(id, &input)], &mut out);
        for (i, x) in input.iter().enumerate() {
            assert!((out[2 * i] - x).abs() < 1e-6);
            assert!((out[2 * i + 1] - x).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sources_lifecycle() {
        let mut core = Core::new(AudioState::new(44_100, 128).unwrap());
        core.create_listener(0.0875);
        let a = core.create_source();
        let b = core.create_source();
        assert_eq!(core.num_sources(), 2);
        core.remove_source(a);
        assert_eq!(core.num_sources(), 1);
        assert!(core.source(a).is_none());
        assert!(core.source(b).is_some());
    }

    #[test]
    fn test_audio_state_change_resets() {
        let mut core = Core::new(AudioState::new(44_100, 128).unwrap());
        core.create_listener(0.0875);
        let id = core.create_source();
        core.create_environment();
        core.set_audio_state(AudioState::new(48_000, 256).unwrap());
        assert_eq!(core.audio_state().block_size, 256);
        // Sources survive a reset, environments do not.
        assert!(core.source(id).is_some());
        assert!(core.environment_mut(0).is_none());
        // Idempotent for the same state
        core.set_audio_state(AudioState::new(48_000, 256).unwrap());
        assert_eq!(core.audio_state().sample_rate, 48_000);
    }
}
