//! Navigation state and IMU bias types.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::pose::Pose3D;

/// Pose plus world-frame linear velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavState {
    /// Body pose in the world frame.
    pub pose: Pose3D,
    /// Linear velocity in the world frame (m/s).
    pub velocity: Vector3<f64>,
}

impl NavState {
    /// Create a navigation state.
    #[inline]
    pub fn new(pose: Pose3D, velocity: Vector3<f64>) -> Self {
        Self { pose, velocity }
    }

    /// Identity pose with zero velocity.
    #[inline]
    pub fn identity() -> Self {
        Self {
            pose: Pose3D::identity(),
            velocity: Vector3::zeros(),
        }
    }
}

impl Default for NavState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Slowly varying accelerometer and gyroscope biases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuBias {
    /// Accelerometer bias (m/s^2).
    pub accel: Vector3<f64>,
    /// Gyroscope bias (rad/s).
    pub gyro: Vector3<f64>,
}

impl ImuBias {
    /// Zero bias.
    #[inline]
    pub fn zero() -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
        }
    }

    /// Remove the accelerometer bias from a raw measurement.
    #[inline]
    pub fn correct_accel(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        raw - self.accel
    }

    /// Remove the gyroscope bias from a raw measurement.
    #[inline]
    pub fn correct_gyro(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        raw - self.gyro
    }
}

impl Default for ImuBias {
    fn default() -> Self {
        Self::zero()
    }
}
