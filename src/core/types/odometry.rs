//! Odometry message types exchanged between the fusion components.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::pose::Pose3D;

/// A low-rate pose correction from the scan-matching module.
///
/// The pose is expressed in the LiDAR frame. `degenerate` marks an
/// under-constrained scan-to-map solution; upstream encodes the flag in the
/// first covariance entry (1 => degenerate), which `from_covariance_entry`
/// decodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarPose {
    /// Correction timestamp in microseconds.
    pub timestamp_us: u64,
    /// Pose in the LiDAR frame.
    pub pose: Pose3D,
    /// Whether the scan-to-map solution was degenerate.
    pub degenerate: bool,
}

impl LidarPose {
    /// Create a correction message.
    #[inline]
    pub fn new(timestamp_us: u64, pose: Pose3D, degenerate: bool) -> Self {
        Self {
            timestamp_us,
            pose,
            degenerate,
        }
    }

    /// Decode the degeneracy flag from the first pose-covariance entry.
    #[inline]
    pub fn from_covariance_entry(timestamp_us: u64, pose: Pose3D, cov00: f64) -> Self {
        Self {
            timestamp_us,
            pose,
            degenerate: cov00 as i64 == 1,
        }
    }
}

/// IMU-rate incremental odometry emitted by the propagator.
///
/// The pose is expressed in the LiDAR frame, the linear velocity in the
/// world frame. The angular velocity mirrors the raw gyroscope measurement
/// offset by the current gyro bias estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuOdometry {
    /// Timestamp of the driving IMU sample, microseconds.
    pub timestamp_us: u64,
    /// Pose in the LiDAR frame.
    pub pose: Pose3D,
    /// World-frame linear velocity (m/s).
    pub linear_velocity: Vector3<f64>,
    /// Body-frame angular rate (rad/s).
    pub angular_velocity: Vector3<f64>,
}

/// IMU-rate odometry re-anchored to the latest LiDAR correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedOdometry {
    /// Timestamp of the newest contributing IMU sample, microseconds.
    pub timestamp_us: u64,
    /// LiDAR-anchored pose.
    pub pose: Pose3D,
    /// World-frame linear velocity (m/s).
    pub linear_velocity: Vector3<f64>,
    /// Body-frame angular rate (rad/s).
    pub angular_velocity: Vector3<f64>,
}

/// A published relation between two named coordinate frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    /// Parent frame identifier.
    pub parent: String,
    /// Child frame identifier.
    pub child: String,
    /// Timestamp in microseconds.
    pub timestamp_us: u64,
    /// Transform taking points from `child` to `parent`.
    pub pose: Pose3D,
}

/// One sample of the trailing fused-odometry path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSample {
    /// Sample timestamp in microseconds.
    pub timestamp_us: u64,
    /// Fused pose at that time.
    pub pose: Pose3D,
}

/// Short trailing trajectory behind the newest fused pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailingPath {
    /// Samples ordered by timestamp, at least 100 ms apart.
    pub samples: Vec<PathSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degeneracy_decoding() {
        let pose = Pose3D::identity();
        assert!(LidarPose::from_covariance_entry(0, pose, 1.0).degenerate);
        assert!(!LidarPose::from_covariance_entry(0, pose, 0.0).degenerate);
        // Any non-one entry means a healthy correction.
        assert!(!LidarPose::from_covariance_entry(0, pose, 0.25).degenerate);
    }
}
