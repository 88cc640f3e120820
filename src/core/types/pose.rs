//! 3-D rigid-transform type.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform in 3-D space.
///
/// Rotation stored as a unit quaternion, translation in meters. Composition
/// follows the usual convention: `a.compose(&b)` applies `b` in the frame of
/// `a`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3D {
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
    /// Position in meters.
    pub translation: Vector3<f64>,
}

impl Pose3D {
    /// Create a pose from rotation and translation.
    #[inline]
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity pose at the origin.
    #[inline]
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pure translation with identity rotation.
    #[inline]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Compose two poses: self * other.
    ///
    /// Applies `other` relative to the `self` frame.
    #[inline]
    pub fn compose(&self, other: &Pose3D) -> Pose3D {
        Pose3D {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }

    /// Inverse transform, such that `p.compose(&p.inverse())` is identity.
    #[inline]
    pub fn inverse(&self) -> Pose3D {
        let inv_rot = self.rotation.inverse();
        Pose3D {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    /// Transform a point from the local frame to the parent frame.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}

impl Default for Pose3D {
    fn default() -> Self {
        Self::identity()
    }
}
