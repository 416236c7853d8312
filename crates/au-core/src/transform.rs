//! Position + orientation pair

use serde::{Deserialize, Serialize};

use crate::quaternion::Quaternion;
use crate::vector3::Vector3;

/// A rigid transform: world position and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl Transform {
    pub fn new(position: Vector3, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vector3) -> Self {
        Self {
            position,
            orientation: Quaternion::IDENTITY,
        }
    }

    pub fn set_position(&mut self, position: Vector3) {
        self.position = position;
    }

    pub fn set_orientation(&mut self, orientation: Quaternion) {
        self.orientation = orientation.normalized();
    }

    /// Vector from this transform to a target position, expressed in this
    /// transform's local frame (so azimuth/elevation of the result are
    /// relative to where this transform is facing).
    pub fn vector_to(&self, target: &Transform) -> Vector3 {
        let world = target.position - self.position;
        self.orientation.rotate_inverse(world)
    }

    /// A transform displaced by `local_offset` expressed in this transform's
    /// local frame, keeping the same orientation. Used for the ear positions.
    pub fn translated_local(&self, local_offset: Vector3) -> Transform {
        Transform {
            position: self.position + self.orientation.rotate(local_offset),
            orientation: self.orientation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_to_in_local_frame() {
        // Listener at origin rotated 90 deg anticlockwise (facing +Y);
        // a target straight ahead of it must come out at azimuth 0.
        let mut listener = Transform::from_position(Vector3::zero());
        listener.set_orientation(Quaternion::from_axis_angle(
            Vector3::new(0.0, 0.0, 1.0),
            std::f32::consts::FRAC_PI_2,
        ));
        let target = Transform::from_position(Vector3::new(0.0, 3.0, 0.0));
        let v = listener.vector_to(&target);
        assert_relative_eq!(v.azimuth_degrees(), 0.0, epsilon = 1e-3);
        assert_relative_eq!(v.magnitude(), 3.0, epsilon = 1e-5);
    }

    #[test]
    fn test_translated_local_ears() {
        let head = Transform::from_position(Vector3::new(1.0, 0.0, 0.0));
        let left_ear = head.translated_local(Vector3::new(0.0, 0.09, 0.0));
        assert_relative_eq!(left_ear.position.y, 0.09, epsilon = 1e-6);
        assert_relative_eq!(left_ear.position.x, 1.0, epsilon = 1e-6);
    }
}
