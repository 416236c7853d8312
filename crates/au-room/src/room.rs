//! Rooms as wall sets

use serde::{Deserialize, Serialize};

use au_core::{CoreError, CoreResult, Vector3};

use crate::wall::{Wall, ABSORPTION_BANDS};

/// Arbitrary room geometry: a corner pool plus one index list per wall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomGeometry {
    pub corners: Vec<Vector3>,
    pub walls: Vec<Vec<usize>>,
}

/// A room is a set of convex walls with inward normals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Room {
    walls: Vec<Wall>,
    shoebox: bool,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis-aligned shoebox centred on the origin: length along X, width
    /// along Y, height along Z. Redefining an existing shoebox keeps each
    /// wall's enabled state.
    pub fn setup_shoebox(&mut self, length: f32, width: f32, height: f32) {
        let previous: Option<Vec<bool>> = if self.shoebox {
            Some(self.walls.iter().map(|w| w.is_active()).collect())
        } else {
            None
        };
        self.walls.clear();

        let l = length / 2.0;
        let w = width / 2.0;
        let h = height / 2.0;

        // Corner order keeps every normal pointing into the room.
        let corner_lists: [[Vector3; 4]; 6] = [
            // front (x = +l)
            [
                Vector3::new(l, w, h),
                Vector3::new(l, w, -h),
                Vector3::new(l, -w, -h),
                Vector3::new(l, -w, h),
            ],
            // left (y = +w)
            [
                Vector3::new(-l, w, h),
                Vector3::new(-l, w, -h),
                Vector3::new(l, w, -h),
                Vector3::new(l, w, h),
            ],
            // right (y = -w)
            [
                Vector3::new(l, -w, h),
                Vector3::new(l, -w, -h),
                Vector3::new(-l, -w, -h),
                Vector3::new(-l, -w, h),
            ],
            // back (x = -l)
            [
                Vector3::new(-l, -w, h),
                Vector3::new(-l, -w, -h),
                Vector3::new(-l, w, -h),
                Vector3::new(-l, w, h),
            ],
            // floor (z = -h)
            [
                Vector3::new(l, w, -h),
                Vector3::new(-l, w, -h),
                Vector3::new(-l, -w, -h),
                Vector3::new(l, -w, -h),
            ],
            // ceiling (z = +h)
            [
                Vector3::new(l, -w, h),
                Vector3::new(-l, -w, h),
                Vector3::new(-l, w, h),
                Vector3::new(l, w, h),
            ],
        ];

        for corners in corner_lists {
            let mut wall = Wall::new();
            for corner in corners {
                wall.insert_corner(corner);
            }
            self.walls.push(wall);
        }

        if let Some(previous) = previous {
            for (wall, was_active) in self.walls.iter_mut().zip(previous) {
                if !was_active {
                    wall.disable();
                }
            }
        }
        self.shoebox = true;
    }

    pub fn setup_geometry(&mut self, geometry: &RoomGeometry) -> CoreResult<()> {
        let mut walls = Vec::with_capacity(geometry.walls.len());
        for indices in &geometry.walls {
            if indices.len() < 3 {
                return Err(CoreError::InvalidParam(
                    "a wall needs at least three corners".into(),
                ));
            }
            let mut wall = Wall::new();
            for &i in indices {
                let corner = geometry
                    .corners
                    .get(i)
                    .copied()
                    .ok_or_else(|| CoreError::OutOfRange(format!("corner index {i}")))?;
                wall.insert_corner(corner);
            }
            walls.push(wall);
        }
        self.walls = walls;
        self.shoebox = false;
        Ok(())
    }

    pub fn insert_wall(&mut self, wall: Wall) {
        self.walls.push(wall);
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn is_shoebox(&self) -> bool {
        self.shoebox
    }

    pub fn enable_wall(&mut self, index: usize) {
        if let Some(w) = self.walls.get_mut(index) {
            w.enable();
        }
    }

    pub fn disable_wall(&mut self, index: usize) {
        if let Some(w) = self.walls.get_mut(index) {
            w.disable();
        }
    }

    pub fn set_wall_absorption(&mut self, index: usize, absorption: f32) -> CoreResult<()> {
        let wall = self
            .walls
            .get_mut(index)
            .ok_or_else(|| CoreError::OutOfRange(format!("wall index {index}")))?;
        wall.set_absorption(absorption);
        Ok(())
    }

    pub fn set_wall_absorption_bands(
        &mut self,
        index: usize,
        bands: [f32; ABSORPTION_BANDS],
    ) -> CoreResult<()> {
        let wall = self
            .walls
            .get_mut(index)
            .ok_or_else(|| CoreError::OutOfRange(format!("wall index {index}")))?;
        wall.set_absorption_bands(bands);
        Ok(())
    }

    /// Mirror the whole room across one of its walls; the reflection chain
    /// for higher-order images continues inside the image room.
    pub fn image_across(&self, wall_index: usize) -> Room {
        let mirror = &self.walls[wall_index];
        let walls = self.walls.iter().map(|w| mirror.image_wall(w)).collect();
        Room {
            walls,
            shoebox: false,
        }
    }

    pub fn center(&self) -> Vector3 {
        let mut c = Vector3::zero();
        for wall in &self.walls {
            c = c + wall.center();
        }
        c.scaled(1.0 / self.walls.len().max(1) as f32)
    }

    /// True when a point lies on the inner side of every active wall; also
    /// reports the distance to the nearest wall plane.
    pub fn contains_point(&self, point: Vector3) -> (bool, f32) {
        let mut inside = true;
        let mut nearest = f32::MAX;
        for wall in &self.walls {
            if !wall.is_active() {
                continue;
            }
            nearest = nearest.min(wall.distance_from_point(point));
            let to_center = wall.center() - point;
            if wall.normal().dot(&to_center) > 0.0 {
                // Normal points inward, so the wall center should be behind
                // the point along -normal when the point is inside.
                inside = false;
            }
        }
        (inside, nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_shoebox_has_six_inward_walls() {
        let mut room = Room::new();
        room.setup_shoebox(10.0, 6.0, 3.0);
        assert_eq!(room.walls().len(), 6);
        assert!(room.is_shoebox());
        for wall in room.walls() {
            // Normal must point from the wall towards the room center
            let to_center = Vector3::zero() - wall.center();
            assert!(
                wall.normal().dot(&to_center) > 0.9,
                "normal {:?} center {:?}",
                wall.normal(),
                wall.center()
            );
        }
    }

    #[test]
    fn test_shoebox_resetup_keeps_disabled_walls() {
        let mut room = Room::new();
        room.setup_shoebox(4.0, 4.0, 3.0);
        room.disable_wall(2);
        room.setup_shoebox(5.0, 5.0, 3.0);
        assert!(!room.walls()[2].is_active());
        assert!(room.walls()[0].is_active());
    }

    #[test]
    fn test_contains_point() {
        let mut room = Room::new();
        room.setup_shoebox(4.0, 4.0, 4.0);
        assert!(room.contains_point(Vector3::zero()).0);
        assert!(!room.contains_point(Vector3::new(3.0, 0.0, 0.0)).0);
    }

    #[test]
    fn test_custom_geometry() {
        // A single triangular wall
        let geometry = RoomGeometry {
            corners: vec![
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(1.0, 0.0, 1.0),
            ],
            walls: vec![vec![0, 1, 2]],
        };
        let mut room = Room::new();
        room.setup_geometry(&geometry).unwrap();
        assert_eq!(room.walls().len(), 1);
        assert!(!room.is_shoebox());

        let bad = RoomGeometry {
            corners: vec![Vector3::zero()],
            walls: vec![vec![0, 1, 2]],
        };
        assert!(room.setup_geometry(&bad).is_err());
    }

    #[test]
    fn test_geometry_serde_round_trip() {
        let geometry = RoomGeometry {
            corners: vec![
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(1.0, 0.0, 1.0),
            ],
            walls: vec![vec![0, 1, 2]],
        };
        let json = serde_json::to_string(&geometry).unwrap();
        let back: RoomGeometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.corners.len(), 3);
        assert_eq!(back.walls[0], vec![0, 1, 2]);
    }

    #[test]
    fn test_image_room_mirrors_center() {
        let mut room = Room::new();
        room.setup_shoebox(4.0, 4.0, 4.0);
        // Mirror across the front wall (x = +2): center moves to x = 4
        let image = room.image_across(0);
        assert_relative_eq!(image.center().x, 4.0, epsilon = 1e-4);
    }
}
