//! Per-source image-source engine
//!
//! Owns the room and one image tree per tracked source. Trees are rebuilt
//! only when the geometry, the reflection order, or a source position change
//! beyond a threshold; listener movement just refreshes visibility. Per
//! block the engine turns every visible image into a virtual source carrying
//! the absorption-filtered input.

use std::collections::HashMap;

use au_core::{AudioState, Sample, Vector3};

use crate::images::ImageSourceTree;
use crate::room::Room;

pub const DEFAULT_REFLECTION_ORDER: usize = 1;
pub const DEFAULT_MAX_DISTANCE_IMAGE_SOURCES: f32 = 100.0;

/// Source movement below this distance updates image locations in place
/// instead of rebuilding the tree.
pub const DEFAULT_REBUILD_THRESHOLD_M: f32 = 1.0;

/// One geometric reflection handed to the anechoic/ambisonic paths.
#[derive(Debug, Clone)]
pub struct VirtualSource {
    pub location: Vector3,
    pub buffer: Vec<Sample>,
    /// Reflection order of the generating image.
    pub order: usize,
    /// Stable index of the generating node within its tree; callers key
    /// persistent per-reflection DSP state on it.
    pub node_index: usize,
}

#[derive(Debug)]
struct TrackedSource {
    tree: ImageSourceTree,
    built_location: Vector3,
    /// Blocks of silence left per node before a newborn reflection sounds.
    silence_blocks: Vec<usize>,
}

#[derive(Debug)]
pub struct IsmEngine {
    room: Room,
    reflection_order: usize,
    max_distance: f32,
    rebuild_threshold: f32,
    audio_state: AudioState,
    sound_speed: f32,
    listener_location: Vector3,
    sources: HashMap<u64, TrackedSource>,
}

impl IsmEngine {
    pub fn new(audio_state: AudioState) -> Self {
        Self {
            room: Room::new(),
            reflection_order: DEFAULT_REFLECTION_ORDER,
            max_distance: DEFAULT_MAX_DISTANCE_IMAGE_SOURCES,
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD_M,
            audio_state,
            sound_speed: au_core::magnitudes::DEFAULT_SOUND_SPEED,
            listener_location: Vector3::zero(),
            sources: HashMap::new(),
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Replace the room; all trees rebuild on the next update.
    pub fn set_room(&mut self, room: Room) {
        self.room = room;
        self.sources.clear();
    }

    pub fn room_mut(&mut self) -> &mut Room {
        // Geometry edits invalidate every tree.
        self.sources.clear();
        &mut self.room
    }

    pub fn set_reflection_order(&mut self, order: usize) {
        if order != self.reflection_order {
            self.reflection_order = order;
            self.sources.clear();
        }
    }

    pub fn reflection_order(&self) -> usize {
        self.reflection_order
    }

    pub fn set_max_distance(&mut self, meters: f32) {
        self.max_distance = meters;
    }

    pub fn set_rebuild_threshold(&mut self, meters: f32) {
        self.rebuild_threshold = meters;
    }

    pub fn remove_source(&mut self, source_id: u64) {
        self.sources.remove(&source_id);
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Refresh visibility after listener movement.
    pub fn set_listener_location(&mut self, location: Vector3) {
        self.listener_location = location;
        for tracked in self.sources.values_mut() {
            tracked.tree.update_visibility(location);
        }
    }

    /// Track a source position, rebuilding or sliding its tree as needed.
    pub fn set_source_location(&mut self, source_id: u64, location: Vector3) {
        let needs_rebuild = match self.sources.get(&source_id) {
            None => true,
            Some(t) => (t.built_location - location).magnitude() > self.rebuild_threshold,
        };

        if needs_rebuild {
            let tree = ImageSourceTree::build(
                &self.room,
                location,
                self.listener_location,
                self.reflection_order,
                self.audio_state,
            );
            log::debug!(
                "image tree rebuilt for source {source_id}: {} nodes at order {}",
                tree.len(),
                self.reflection_order
            );
            let silence_blocks = self.newborn_silence(&tree, location);
            self.sources.insert(
                source_id,
                TrackedSource {
                    tree,
                    built_location: location,
                    silence_blocks,
                },
            );
        } else if let Some(tracked) = self.sources.get_mut(&source_id) {
            tracked.tree.update_locations(location);
            tracked.tree.update_visibility(self.listener_location);
        }
    }

    /// Silence (in whole blocks) before each newborn reflection becomes
    /// audible: the extra propagation delay of the image path.
    fn newborn_silence(&self, tree: &ImageSourceTree, source_location: Vector3) -> Vec<usize> {
        let direct = (self.listener_location - source_location).magnitude();
        tree.nodes()
            .iter()
            .map(|node| {
                let image_distance = (self.listener_location - node.location).magnitude();
                let extra_m = (image_distance - direct).max(0.0);
                let extra_samples = extra_m / self.sound_speed * self.audio_state.sample_rate as f32;
                (extra_samples / self.audio_state.block_size as f32).round() as usize
            })
            .collect()
    }

    /// Produce the virtual sources for one block of a source's input.
    pub fn process(&mut self, source_id: u64, input: &[Sample]) -> Vec<VirtualSource> {
        let Some(tracked) = self.sources.get_mut(&source_id) else {
            return Vec::new();
        };

        let mut virtual_sources = Vec::new();
        for index in 0..tracked.tree.len() {
            let node_visible = tracked.tree.nodes()[index].visible;
            let location = tracked.tree.nodes()[index].location;
            let order = tracked.tree.nodes()[index].order;

            if let Some(silence) = tracked.silence_blocks.get_mut(index) {
                if *silence > 0 {
                    *silence -= 1;
                    continue;
                }
            }
            if !node_visible {
                continue;
            }
            if (location - self.listener_location).magnitude() > self.max_distance {
                continue;
            }

            let mut buffer = vec![0.0; input.len()];
            tracked.tree.process_node(index, input, &mut buffer);
            virtual_sources.push(VirtualSource {
                location,
                buffer,
                order,
                node_index: index,
            });
        }
        virtual_sources
    }
}
