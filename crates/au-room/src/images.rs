//! Image-source trees as flat arenas
//!
//! Nodes are stored breadth-first in a vector with parent indices, so the
//! per-block walk is a plain loop with no recursion. Each node owns a
//! 9-band graphic EQ loaded with its cascaded wall-absorption gains.

use au_core::{AudioState, Sample, Vector3};
use au_dsp::GraphicEq;

use crate::wall::{Wall, ABSORPTION_BANDS};
use crate::Room;

/// One image source in the arena.
#[derive(Debug)]
pub struct ImageNode {
    pub location: Vector3,
    pub parent: Option<usize>,
    /// The wall this image reflects across, in the frame of its parent's
    /// (possibly already mirrored) room.
    pub wall: Wall,
    /// Cascaded per-band reflection gains: product of sqrt(1 - absorption)
    /// along the chain.
    pub band_gains: [Sample; ABSORPTION_BANDS],
    pub visibility: f32,
    pub visible: bool,
    /// Reflection order (1 = first bounce).
    pub order: usize,
    eq: GraphicEq,
}

/// All image sources of one audio source.
#[derive(Debug, Default)]
pub struct ImageSourceTree {
    nodes: Vec<ImageNode>,
    source_location: Vector3,
}

impl ImageSourceTree {
    /// Build the tree breadth-first up to `reflection_order` bounces.
    ///
    /// A candidate image is accepted only when it lies farther from the
    /// listener than the node it mirrors; otherwise source and listener sit
    /// on the same side of the wall and the reflection is not real.
    pub fn build(
        room: &Room,
        source_location: Vector3,
        listener_location: Vector3,
        reflection_order: usize,
        audio_state: AudioState,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            source_location,
        };
        if reflection_order == 0 {
            return tree;
        }

        // (parent index, room at this depth, remaining depth)
        let mut queue: std::collections::VecDeque<(Option<usize>, Room, usize)> =
            std::collections::VecDeque::new();
        queue.push_back((None, room.clone(), reflection_order));

        while let Some((parent, level_room, depth)) = queue.pop_front() {
            let parent_location = match parent {
                Some(p) => tree.nodes[p].location,
                None => source_location,
            };
            let parent_gains = match parent {
                Some(p) => tree.nodes[p].band_gains,
                None => [1.0; ABSORPTION_BANDS],
            };
            let parent_order = parent.map(|p| tree.nodes[p].order).unwrap_or(0);

            for (wall_index, wall) in level_room.walls().iter().enumerate() {
                if !wall.is_active() {
                    continue;
                }
                let image = wall.image_point(parent_location);
                let parent_distance = (listener_location - parent_location).magnitude();
                let image_distance = (listener_location - image).magnitude();
                if image_distance <= parent_distance {
                    continue;
                }

                let mut band_gains = parent_gains;
                for (gain, absorption) in band_gains.iter_mut().zip(wall.absorption_bands()) {
                    *gain *= (1.0 - absorption).max(0.0).sqrt();
                }

                let mut eq = GraphicEq::octave_bands(
                    audio_state.sample_rate as f64,
                    audio_state.block_size,
                );
                eq.set_band_gains(&band_gains);

                let node_index = tree.nodes.len();
                tree.nodes.push(ImageNode {
                    location: image,
                    parent,
                    wall: wall.clone(),
                    band_gains,
                    visibility: 0.0,
                    visible: false,
                    order: parent_order + 1,
                    eq,
                });

                if depth > 1 {
                    queue.push_back((
                        Some(node_index),
                        level_room.image_across(wall_index),
                        depth - 1,
                    ));
                }
            }
        }

        tree.update_visibility(listener_location);
        tree
    }

    pub fn nodes(&self) -> &[ImageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn source_location(&self) -> Vector3 {
        self.source_location
    }

    /// Recompute every image location after the source moved, keeping the
    /// tree structure. Arena order is breadth-first, so parents are always
    /// updated before their children.
    pub fn update_locations(&mut self, source_location: Vector3) {
        self.source_location = source_location;
        for i in 0..self.nodes.len() {
            let parent_location = match self.nodes[i].parent {
                Some(p) => self.nodes[p].location,
                None => source_location,
            };
            self.nodes[i].location = self.nodes[i].wall.image_point(parent_location);
        }
    }

    /// Recompute visibility for the current listener position.
    ///
    /// For each node the ray from its image location to the listener is
    /// intersected with every reflection wall along the chain; the node's
    /// visibility is the geometric mean of the per-wall sharpness values.
    pub fn update_visibility(&mut self, listener_location: Vector3) {
        for i in 0..self.nodes.len() {
            let image_location = self.nodes[i].location;
            let mut product = 1.0f32;
            let mut visible = true;
            let mut chain_len = 0usize;

            let mut walk = Some(i);
            while let Some(node_index) = walk {
                let node = &self.nodes[node_index];
                let hit = node
                    .wall
                    .check_point_inside(node.wall.intersection_with_line(image_location, listener_location));
                product *= hit.sharpness;
                visible &= hit.sharpness > 0.0;
                chain_len += 1;
                walk = node.parent;
            }

            let node = &mut self.nodes[i];
            node.visible = visible;
            node.visibility = if visible && chain_len > 0 {
                product.powf(1.0 / chain_len as f32)
            } else {
                0.0
            };
        }
    }

    /// Filter the source block through one node's absorption EQ, weighted by
    /// its visibility.
    pub fn process_node(&mut self, index: usize, input: &[Sample], output: &mut [Sample]) {
        let node = &mut self.nodes[index];
        node.eq.process_to(input, output);
        let visibility = node.visibility;
        for s in output.iter_mut() {
            *s *= visibility;
        }
    }
}
