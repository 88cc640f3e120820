//! IMU noise parameters for preintegration.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Position-integration noise sigma.
///
/// Accounts for the error committed when integrating position from
/// velocities. Fixed; there is no configuration knob.
pub const INTEGRATION_SIGMA: f64 = 1e-4;

/// Continuous-time IMU noise densities (1-sigma).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImuNoiseParams {
    /// Accelerometer white noise (m/s^2).
    pub acc_noise: f64,
    /// Gyroscope white noise (rad/s).
    pub gyr_noise: f64,
    /// Accelerometer bias random walk, per axis.
    pub acc_bias_noise: f64,
    /// Gyroscope bias random walk, per axis.
    pub gyr_bias_noise: f64,
}

impl Default for ImuNoiseParams {
    fn default() -> Self {
        Self {
            // Allan-variance figures for a consumer MEMS IMU (e.g. MPU-9250
            // class); override per device.
            acc_noise: 3.9939570888238808e-3,
            gyr_noise: 1.5636343949698187e-3,
            acc_bias_noise: 6.4356659353532566e-5,
            gyr_bias_noise: 3.5640318696367613e-5,
        }
    }
}

impl ImuNoiseParams {
    /// Per-axis bias random-walk sigmas, ordered [accel xyz, gyro xyz].
    ///
    /// Scaled by sqrt of the preintegration interval when building the
    /// bias between-factor.
    #[inline]
    pub fn bias_walk_sigmas(&self) -> (Vector3<f64>, Vector3<f64>) {
        (
            Vector3::repeat(self.acc_bias_noise),
            Vector3::repeat(self.gyr_bias_noise),
        )
    }
}

/// Parameters driving a `PreintegratedImu`.
#[derive(Debug, Clone, Copy)]
pub struct PreintegrationParams {
    /// World-frame gravity vector (z-up convention, so (0, 0, -g)).
    pub gravity: Vector3<f64>,
    /// Accelerometer white noise sigma.
    pub acc_sigma: f64,
    /// Gyroscope white noise sigma.
    pub gyr_sigma: f64,
    /// Position-integration noise sigma.
    pub integration_sigma: f64,
}

impl PreintegrationParams {
    /// Build parameters for a z-up world with the given gravity magnitude.
    pub fn new(gravity_magnitude: f64, noise: &ImuNoiseParams) -> Self {
        Self {
            gravity: Vector3::new(0.0, 0.0, -gravity_magnitude),
            acc_sigma: noise.acc_noise,
            gyr_sigma: noise.gyr_noise,
            integration_sigma: INTEGRATION_SIGMA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gravity_points_down() {
        let params = PreintegrationParams::new(9.81, &ImuNoiseParams::default());
        assert!(params.gravity.z < 0.0);
        assert_eq!(params.gravity.x, 0.0);
        assert_eq!(params.gravity.y, 0.0);
    }

    #[test]
    fn test_bias_walk_sigmas_per_axis() {
        let noise = ImuNoiseParams::default();
        let (ba, bg) = noise.bias_walk_sigmas();
        assert_eq!(ba.x, ba.y);
        assert_eq!(ba.y, ba.z);
        assert_eq!(bg.x, noise.gyr_bias_noise);
    }
}
