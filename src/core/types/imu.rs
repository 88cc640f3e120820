//! Raw IMU measurement type.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A single IMU measurement.
///
/// Samples entering the estimator are expected to already be expressed in
/// the IMU body frame, i.e. after the configured sensor rectification has
/// been applied (see `imu::ImuRectifier`). Timestamps are microseconds and
/// monotonically non-decreasing within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    /// Measurement timestamp in microseconds.
    pub timestamp_us: u64,
    /// Linear acceleration (m/s^2), specific force including gravity.
    pub accel: Vector3<f64>,
    /// Angular velocity (rad/s).
    pub gyro: Vector3<f64>,
    /// Orientation from the device's internal filter, when available.
    pub orientation: Option<UnitQuaternion<f64>>,
}

impl ImuSample {
    /// Create a sample without an orientation estimate.
    #[inline]
    pub fn new(timestamp_us: u64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            timestamp_us,
            accel,
            gyro,
            orientation: None,
        }
    }

    /// Create a sample carrying a device orientation.
    #[inline]
    pub fn with_orientation(
        timestamp_us: u64,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
    ) -> Self {
        Self {
            timestamp_us,
            accel,
            gyro,
            orientation: Some(orientation),
        }
    }
}
