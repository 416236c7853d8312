//! 3D vector with the toolkit's spherical conventions
//!
//! Axes: X forward, Y left, Z up. Azimuth grows anticlockwise (a source on
//! the left is at +90 degrees) and is reported in [0, 360). Elevation is
//! reported in [0, 360) with 90 at the zenith and 270 at the nadir.

use serde::{Deserialize, Serialize};

/// 3D vector in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub const ZERO: Vector3 = Vector3 {
    x: 0.0,
    y: 0.0,
    z: 0.0,
};

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        ZERO
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn dot(&self, other: &Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn normalized(&self) -> Vector3 {
        let m = self.magnitude();
        if m < 1e-10 {
            return Vector3::new(1.0, 0.0, 0.0);
        }
        Vector3::new(self.x / m, self.y / m, self.z / m)
    }

    pub fn scaled(&self, k: f32) -> Vector3 {
        Vector3::new(self.x * k, self.y * k, self.z * k)
    }

    /// Azimuth in radians, anticlockwise from the forward (X) axis, in [0, 2π).
    pub fn azimuth_radians(&self) -> f32 {
        let az = self.y.atan2(self.x);
        if az < 0.0 {
            az + std::f32::consts::TAU
        } else {
            az
        }
    }

    /// Azimuth in degrees in [0, 360).
    pub fn azimuth_degrees(&self) -> f32 {
        self.azimuth_radians().to_degrees()
    }

    /// Elevation in radians: positive above the horizon, negative below,
    /// in [-π/2, π/2].
    pub fn elevation_signed_radians(&self) -> f32 {
        let horiz = (self.x * self.x + self.y * self.y).sqrt();
        self.z.atan2(horiz)
    }

    /// Elevation in degrees in [0, 360): 90 zenith, 270 nadir.
    pub fn elevation_degrees(&self) -> f32 {
        let el = self.elevation_signed_radians().to_degrees();
        if el < 0.0 {
            el + 360.0
        } else {
            el
        }
    }

    /// Interaural azimuth in radians: asin(sin azimuth · cos elevation).
    /// Positive towards the left (+Y) side.
    pub fn interaural_azimuth_radians(&self) -> f32 {
        let az = self.y.atan2(self.x);
        let el = self.elevation_signed_radians();
        (az.sin() * el.cos()).asin()
    }

    pub fn interaural_azimuth_degrees(&self) -> f32 {
        self.interaural_azimuth_radians().to_degrees()
    }

    /// Angle between this vector and the forward (X) axis, in radians [0, π].
    pub fn angle_to_forward_axis_radians(&self) -> f32 {
        let m = self.magnitude();
        if m < 1e-10 {
            return 0.0;
        }
        (self.x / m).clamp(-1.0, 1.0).acos()
    }

    /// Build a vector from spherical coordinates (degrees, metres).
    pub fn from_spherical(azimuth_deg: f32, elevation_deg: f32, distance: f32) -> Self {
        let az = azimuth_deg.to_radians();
        let mut el = elevation_deg;
        if el >= 270.0 {
            el -= 360.0;
        }
        let el = el.to_radians();
        Vector3::new(
            distance * az.cos() * el.cos(),
            distance * az.sin() * el.cos(),
            distance * el.sin(),
        )
    }
}

impl std::ops::Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_azimuth_convention() {
        // Front
        assert_relative_eq!(
            Vector3::new(1.0, 0.0, 0.0).azimuth_degrees(),
            0.0,
            epsilon = 1e-4
        );
        // Left is +90
        assert_relative_eq!(
            Vector3::new(0.0, 1.0, 0.0).azimuth_degrees(),
            90.0,
            epsilon = 1e-4
        );
        // Right is 270
        assert_relative_eq!(
            Vector3::new(0.0, -1.0, 0.0).azimuth_degrees(),
            270.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_elevation_convention() {
        assert_relative_eq!(
            Vector3::new(0.0, 0.0, 1.0).elevation_degrees(),
            90.0,
            epsilon = 1e-4
        );
        assert_relative_eq!(
            Vector3::new(0.0, 0.0, -1.0).elevation_degrees(),
            270.0,
            epsilon = 1e-4
        );
        assert_relative_eq!(
            Vector3::new(1.0, 0.0, 0.0).elevation_degrees(),
            0.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_spherical_round_trip() {
        let v = Vector3::from_spherical(45.0, 30.0, 2.0);
        assert_relative_eq!(v.azimuth_degrees(), 45.0, epsilon = 1e-3);
        assert_relative_eq!(v.elevation_degrees(), 30.0, epsilon = 1e-3);
        assert_relative_eq!(v.magnitude(), 2.0, epsilon = 1e-4);

        let down = Vector3::from_spherical(0.0, 300.0, 1.0);
        assert_relative_eq!(down.elevation_degrees(), 300.0, epsilon = 1e-3);
    }

    #[test]
    fn test_interaural_azimuth() {
        // Source fully to the left: interaural azimuth = +90 deg
        let left = Vector3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(left.interaural_azimuth_degrees(), 90.0, epsilon = 1e-3);
        // At the zenith the interaural azimuth collapses to 0
        let up = Vector3::new(0.0, 0.0, 1.0);
        assert_relative_eq!(up.interaural_azimuth_degrees(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_angle_to_forward_axis() {
        assert_relative_eq!(
            Vector3::new(1.0, 0.0, 0.0).angle_to_forward_axis_radians(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            Vector3::new(-1.0, 0.0, 0.0).angle_to_forward_axis_radians(),
            std::f32::consts::PI,
            epsilon = 1e-6
        );
    }
}
