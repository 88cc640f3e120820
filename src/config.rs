//! Configuration for the fusion pipeline.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::types::Pose3D;
use crate::imu::ImuNoiseParams;

/// All tunables of the IMU-LiDAR fusion core.
///
/// Defaults suit a 500 Hz MEMS IMU with LiDAR corrections arriving at
/// roughly 10 Hz.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Gravity magnitude (m/s^2).
    pub gravity: f64,

    /// IMU white-noise and bias random-walk densities.
    pub noise: ImuNoiseParams,

    /// Rotation taking raw sensor measurements into the IMU body frame.
    pub sensor_rotation: UnitQuaternion<f64>,

    /// LiDAR-to-IMU translation (meters). The rotation component of this
    /// extrinsic is assumed identity; the sign flips between the two
    /// transform directions.
    pub ext_trans: Vector3<f64>,

    /// LiDAR frame identifier.
    pub lidar_frame: String,
    /// Body frame identifier.
    pub baselink_frame: String,
    /// Odometry frame identifier.
    pub odometry_frame: String,
    /// Map frame identifier.
    pub map_frame: String,

    /// Transform from the LiDAR frame to the body frame, used for the
    /// odom-to-body output when the two frames differ. `None` falls back
    /// to identity with a warning.
    pub lidar_to_baselink: Option<Pose3D>,

    /// Corrections between graph reseeds.
    pub reseed_interval: usize,

    /// Nominal IMU sample period (seconds), used when no previous sample
    /// timestamp is available.
    pub nominal_imu_period_s: f64,

    /// Minimum spacing of trailing-path samples (microseconds).
    pub path_interval_us: u64,

    /// Trailing-path window behind the anchor (microseconds).
    pub path_window_us: u64,

    /// Velocity magnitude above which the estimator resets (m/s).
    pub max_velocity: f64,

    /// Bias magnitude above which the estimator resets.
    pub max_bias: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gravity: 9.80511,
            noise: ImuNoiseParams::default(),
            sensor_rotation: UnitQuaternion::identity(),
            ext_trans: Vector3::zeros(),
            lidar_frame: "lidar_link".to_string(),
            baselink_frame: "base_link".to_string(),
            odometry_frame: "odom".to_string(),
            map_frame: "map".to_string(),
            lidar_to_baselink: None,
            reseed_interval: 100,
            nominal_imu_period_s: 1.0 / 500.0,
            path_interval_us: 100_000,
            path_window_us: 1_000_000,
            max_velocity: 30.0,
            max_bias: 1.0,
        }
    }
}

impl FusionConfig {
    /// Transform taking LiDAR-frame poses into the IMU frame.
    #[inline]
    pub fn lidar_to_imu(&self) -> Pose3D {
        Pose3D::from_translation(self.ext_trans)
    }

    /// Transform taking IMU-frame poses into the LiDAR frame.
    #[inline]
    pub fn imu_to_lidar(&self) -> Pose3D {
        Pose3D::from_translation(-self.ext_trans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = FusionConfig::default();
        assert_eq!(config.reseed_interval, 100);
        assert_relative_eq!(config.nominal_imu_period_s, 0.002, epsilon = 1e-12);
        assert!(config.lidar_to_baselink.is_none());
    }

    #[test]
    fn test_extrinsics_cancel() {
        let config = FusionConfig {
            ext_trans: Vector3::new(0.2, -0.1, 0.4),
            ..Default::default()
        };
        let round_trip = config.lidar_to_imu().compose(&config.imu_to_lidar());
        assert_relative_eq!(
            round_trip.translation,
            Vector3::zeros(),
            epsilon = 1e-12
        );
    }
}
