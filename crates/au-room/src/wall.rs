//! Convex polygonal walls
//!
//! A wall is an ordered set of coplanar corners, declared anticlockwise as
//! seen from inside the room, so the plane normal points inward. Walls carry
//! per-octave-band absorption and can be disabled, which makes them
//! transparent to the image-source engine.

use serde::{Deserialize, Serialize};

use au_core::Vector3;

/// Tolerance for plane-membership checks.
const PLANE_THRESHOLD: f32 = 1e-5;

/// Distance from a wall edge over which visibility ramps from 1 to 0.
pub const BORDER_THRESHOLD_M: f32 = 0.3;

/// Number of absorption bands (octaves from 62.5 Hz).
pub const ABSORPTION_BANDS: usize = 9;

/// Result of a point-in-wall test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallHit {
    /// Signed distance to the nearest edge: positive inside the polygon,
    /// negative outside.
    pub distance_to_edge: f32,
    /// Visibility contribution in [0, 1]: 1 comfortably inside, ramping
    /// through 0.5 at the edge, 0 comfortably outside (or off the plane).
    pub sharpness: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wall {
    corners: Vec<Vector3>,
    absorption: [f32; ABSORPTION_BANDS],
    active: bool,
    // Plane Ax + By + Cz + D = 0, refreshed when corners change.
    plane: (f32, f32, f32, f32),
}

impl Default for Wall {
    fn default() -> Self {
        Self::new()
    }
}

impl Wall {
    /// A wall with no corners, purely reflective and active.
    pub fn new() -> Self {
        Self {
            corners: Vec::new(),
            absorption: [0.0; ABSORPTION_BANDS],
            active: true,
            plane: (0.0, 0.0, 0.0, 0.0),
        }
    }

    /// Insert a corner. Once three corners define the plane, further corners
    /// that fall off it are projected onto it; returns false in that case.
    pub fn insert_corner(&mut self, corner: Vector3) -> bool {
        if self.corners.len() < 3 {
            self.corners.push(corner);
            if self.corners.len() == 3 {
                self.recompute_plane();
            }
            true
        } else {
            let (a, b, c, d) = self.plane;
            let diff = (corner.x * a + corner.y * b + corner.z * c + d).abs();
            if diff < PLANE_THRESHOLD {
                self.corners.push(corner);
                true
            } else {
                let projected = self.point_projection(corner);
                self.corners.push(projected);
                false
            }
        }
    }

    pub fn corners(&self) -> &[Vector3] {
        &self.corners
    }

    pub fn set_absorption(&mut self, absorption: f32) {
        self.absorption = [absorption; ABSORPTION_BANDS];
    }

    pub fn set_absorption_bands(&mut self, bands: [f32; ABSORPTION_BANDS]) {
        self.absorption = bands;
    }

    pub fn absorption_bands(&self) -> &[f32; ABSORPTION_BANDS] {
        &self.absorption
    }

    pub fn enable(&mut self) {
        self.active = true;
    }

    pub fn disable(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Unit normal; points inward for anticlockwise corner order.
    pub fn normal(&self) -> Vector3 {
        let p1 = self.corners[1] - self.corners[0];
        let p2 = self.corners[2] - self.corners[0];
        p1.cross(&p2).normalized()
    }

    pub fn center(&self) -> Vector3 {
        let mut c = Vector3::zero();
        for corner in &self.corners {
            c = c + *corner;
        }
        c.scaled(1.0 / self.corners.len() as f32)
    }

    fn recompute_plane(&mut self) {
        let n = self.normal();
        let p = self.corners[2];
        self.plane = (n.x, n.y, n.z, -(n.x * p.x + n.y * p.y + n.z * p.z));
    }

    /// Unsigned distance from a point to the wall plane.
    pub fn distance_from_point(&self, point: Vector3) -> f32 {
        let (a, b, c, d) = self.plane;
        (a * point.x + b * point.y + c * point.z + d).abs() / (a * a + b * b + c * c).sqrt()
    }

    /// Orthogonal projection of a point onto the wall plane.
    pub fn point_projection(&self, point: Vector3) -> Vector3 {
        let (a, b, c, d) = self.plane;
        let n = Vector3::new(a, b, c);
        let lambda = a * point.x + b * point.y + c * point.z + d;
        point - n.scaled(lambda / (a * a + b * b + c * c))
    }

    /// Mirror image of a point across the wall plane.
    pub fn image_point(&self, point: Vector3) -> Vector3 {
        let projection = self.point_projection(point);
        projection + (projection - point)
    }

    /// Mirror image of another wall across this wall's plane. Corner order
    /// is reversed so the image wall keeps an inward-facing normal.
    pub fn image_wall(&self, wall: &Wall) -> Wall {
        let mut image = Wall::new();
        for corner in wall.corners.iter().rev() {
            image.insert_corner(self.image_point(*corner));
        }
        image.absorption = wall.absorption;
        image.active = wall.active;
        image
    }

    /// Intersection of the line through `p1` and `p2` with the wall plane.
    /// Computed in f64 so the result sits on the plane within the tolerance
    /// of the inside test.
    pub fn intersection_with_line(&self, p1: Vector3, p2: Vector3) -> Vector3 {
        let (a, b, c, d) = (
            self.plane.0 as f64,
            self.plane.1 as f64,
            self.plane.2 as f64,
            self.plane.3 as f64,
        );
        let dir = (
            (p2.x - p1.x) as f64,
            (p2.y - p1.y) as f64,
            (p2.z - p1.z) as f64,
        );
        let denominator = a * dir.0 + b * dir.1 + c * dir.2;
        if denominator.abs() < 1e-12 {
            return p1;
        }
        let lambda = (-d - (a * p1.x as f64 + b * p1.y as f64 + c * p1.z as f64)) / denominator;
        Vector3::new(
            (p1.x as f64 + lambda * dir.0) as f32,
            (p1.y as f64 + lambda * dir.1) as f32,
            (p1.z as f64 + lambda * dir.2) as f32,
        )
    }

    fn distance_point_to_segment_line(point: Vector3, l1: Vector3, l2: Vector3) -> f32 {
        let v1 = l2 - l1;
        let v2 = point - l1;
        v1.cross(&v2).magnitude() / v1.magnitude()
    }

    /// Distance from a point (on the wall plane) to the nearest edge line.
    pub fn distance_to_nearest_edge(&self, point: Vector3) -> f32 {
        let n = self.corners.len();
        let mut min = f32::MAX;
        for i in 0..n {
            let d = Self::distance_point_to_segment_line(point, self.corners[i], self.corners[(i + 1) % n]);
            min = min.min(d);
        }
        min
    }

    /// Test whether a point lies inside the wall polygon, reporting the
    /// signed edge distance and the visibility sharpness.
    pub fn check_point_inside(&self, point: Vector3) -> WallHit {
        if self.distance_from_point(point) > 1e-3 {
            return WallHit {
                distance_to_edge: 0.0,
                sharpness: 0.0,
            };
        }

        // Angle-sum test: interior points see the corners over a full turn.
        // f64 keeps the accumulated acos error under the decision tolerance.
        let n = self.corners.len();
        let mut angle_sum = 0.0f64;
        for i in 0..n {
            let c1 = self.corners[i];
            let c2 = self.corners[(i + 1) % n];
            let p1 = (
                (c1.x - point.x) as f64,
                (c1.y - point.y) as f64,
                (c1.z - point.z) as f64,
            );
            let p2 = (
                (c2.x - point.x) as f64,
                (c2.y - point.y) as f64,
                (c2.z - point.z) as f64,
            );
            let m1 = (p1.0 * p1.0 + p1.1 * p1.1 + p1.2 * p1.2).sqrt();
            let m2 = (p2.0 * p2.0 + p2.1 * p2.1 + p2.2 * p2.2).sqrt();
            if m1 * m2 <= PLANE_THRESHOLD as f64 {
                // On a corner
                return WallHit {
                    distance_to_edge: 0.0,
                    sharpness: 0.5,
                };
            }
            let cos_theta = ((p1.0 * p2.0 + p1.1 * p2.1 + p1.2 * p2.2) / (m1 * m2)).clamp(-1.0, 1.0);
            angle_sum += cos_theta.acos();
        }

        let inside = (std::f64::consts::TAU - angle_sum).abs() < 1e-4;
        let edge = self.distance_to_nearest_edge(point);
        let signed = if inside { edge } else { -edge };
        let sharpness = if signed.abs() < BORDER_THRESHOLD_M {
            0.5 + signed / (2.0 * BORDER_THRESHOLD_M)
        } else if inside {
            1.0
        } else {
            0.0
        };
        WallHit {
            distance_to_edge: signed,
            sharpness,
        }
    }

    /// Minimum corner-to-corner distance between two walls. Bounds how close
    /// an image room can bring an image source to the original room.
    pub fn minimum_distance_from_wall(&self, other: &Wall) -> f32 {
        let mut min = f32::MAX;
        for a in &self.corners {
            for b in &other.corners {
                min = min.min((*a - *b).magnitude());
            }
        }
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_wall() -> Wall {
        // Square in the x = 1 plane, 2 m on a side, normal towards -X (inside)
        let mut w = Wall::new();
        w.insert_corner(Vector3::new(1.0, 1.0, 1.0));
        w.insert_corner(Vector3::new(1.0, 1.0, -1.0));
        w.insert_corner(Vector3::new(1.0, -1.0, -1.0));
        w.insert_corner(Vector3::new(1.0, -1.0, 1.0));
        w
    }

    #[test]
    fn test_normal_points_inward() {
        let w = unit_wall();
        let n = w.normal();
        assert_relative_eq!(n.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(n.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(n.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_image_point_mirrors() {
        let w = unit_wall();
        let image = w.image_point(Vector3::zero());
        assert_relative_eq!(image.x, 2.0, epsilon = 1e-4);
        assert_relative_eq!(image.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_intersection_with_line() {
        let w = unit_wall();
        let hit = w.intersection_with_line(Vector3::zero(), Vector3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(hit.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_sharpness_ramp() {
        let w = unit_wall();
        // Center of the wall: well inside
        let center = w.check_point_inside(Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(center.sharpness, 1.0, epsilon = 1e-5);
        // 0.15 m inside the edge: sharpness 0.75
        let near = w.check_point_inside(Vector3::new(1.0, 0.85, 0.0));
        assert_relative_eq!(near.sharpness, 0.75, epsilon = 1e-3);
        // On the edge: 0.5
        let edge = w.check_point_inside(Vector3::new(1.0, 1.0, 0.0));
        assert!((edge.sharpness - 0.5).abs() < 0.02);
        // 0.15 m outside: 0.25
        let outside = w.check_point_inside(Vector3::new(1.0, 1.15, 0.0));
        assert_relative_eq!(outside.sharpness, 0.25, epsilon = 1e-3);
        // Far outside: 0
        let far = w.check_point_inside(Vector3::new(1.0, 2.0, 0.0));
        assert_relative_eq!(far.sharpness, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_off_plane_corner_is_projected() {
        let mut w = unit_wall();
        let on_plane = w.insert_corner(Vector3::new(1.5, 0.0, 1.2));
        assert!(!on_plane);
        assert_relative_eq!(w.corners().last().unwrap().x, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_image_wall_keeps_absorption() {
        let mut w = unit_wall();
        w.set_absorption(0.4);
        let other = unit_wall();
        let image = w.image_wall(&other);
        assert_eq!(image.absorption_bands()[0], 0.0);
        let mirrored_self = w.image_wall(&w.clone());
        assert_eq!(mirrored_self.absorption_bands()[0], 0.4);
    }
}
