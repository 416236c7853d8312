//! Unit quaternion for orientations

use serde::{Deserialize, Serialize};

use crate::vector3::Vector3;

/// Unit quaternion (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle_rad` radians around `axis`.
    pub fn from_axis_angle(axis: Vector3, angle_rad: f32) -> Self {
        let axis = axis.normalized();
        let half = angle_rad * 0.5;
        let s = half.sin();
        Self {
            w: half.cos(),
            x: axis.x * s,
            y: axis.y * s,
            z: axis.z * s,
        }
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn multiply(&self, o: &Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
            self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
        )
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate(&self, v: Vector3) -> Vector3 {
        let p = Quaternion::new(0.0, v.x, v.y, v.z);
        let r = self.multiply(&p).multiply(&self.conjugate());
        Vector3::new(r.x, r.y, r.z)
    }

    /// Rotate a vector by the inverse of this quaternion.
    pub fn rotate_inverse(&self, v: Vector3) -> Vector3 {
        self.conjugate().rotate(v)
    }

    pub fn normalized(&self) -> Quaternion {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n < 1e-10 {
            return Quaternion::IDENTITY;
        }
        Quaternion::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_rotation() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let r = Quaternion::IDENTITY.rotate(v);
        assert_relative_eq!(r.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(r.y, 2.0, epsilon = 1e-6);
        assert_relative_eq!(r.z, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_yaw_rotation() {
        // 90 degrees anticlockwise around Z sends forward (X) to left (Y)
        let q = Quaternion::from_axis_angle(Vector3::new(0.0, 0.0, 1.0), std::f32::consts::FRAC_PI_2);
        let r = q.rotate(Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(r.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(r.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_round_trip() {
        let q = Quaternion::from_axis_angle(Vector3::new(0.3, 0.5, 1.0), 1.1);
        let v = Vector3::new(0.2, -0.7, 0.4);
        let back = q.rotate_inverse(q.rotate(v));
        assert_relative_eq!(back.x, v.x, epsilon = 1e-5);
        assert_relative_eq!(back.y, v.y, epsilon = 1e-5);
        assert_relative_eq!(back.z, v.z, epsilon = 1e-5);
    }
}
