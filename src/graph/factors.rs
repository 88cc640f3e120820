//! Factor types for the fusion graph.
//!
//! Factors are a closed set for this problem, so they are modeled as a
//! tagged enum and dispatched by match in the optimizer rather than through
//! trait objects.

use nalgebra::{Matrix3, Vector3};

use crate::core::math::{Matrix6, Vector6};
use crate::core::types::{ImuBias, Pose3D};
use crate::imu::PreintegratedImu;

/// Sigmas below this are clamped before inversion; a zero sigma models an
/// equality constraint.
const MIN_SIGMA: f64 = 1e-12;

/// A probabilistic constraint on one or two consecutive keys.
#[derive(Debug, Clone)]
pub enum Factor {
    /// Gaussian prior on the pose at `key`, residual ordered [rotation, translation].
    PriorPose {
        key: usize,
        pose: Pose3D,
        info: Matrix6,
    },
    /// Gaussian prior on the velocity at `key`.
    PriorVelocity {
        key: usize,
        velocity: Vector3<f64>,
        info: Matrix3<f64>,
    },
    /// Gaussian prior on the bias at `key`, residual ordered [accel, gyro].
    PriorBias {
        key: usize,
        bias: ImuBias,
        info: Matrix6,
    },
    /// Preintegrated inertial constraint relating `key - 1` and `key`.
    Imu {
        key: usize,
        preint: PreintegratedImu,
    },
    /// Zero-mean bias random-walk constraint between `key - 1` and `key`,
    /// with per-axis sigmas ordered [accel, gyro].
    BiasBetween { key: usize, sigmas: Vector6 },
}

impl Factor {
    /// Largest key this factor touches.
    pub fn key(&self) -> usize {
        match self {
            Factor::PriorPose { key, .. }
            | Factor::PriorVelocity { key, .. }
            | Factor::PriorBias { key, .. }
            | Factor::Imu { key, .. }
            | Factor::BiasBetween { key, .. } => *key,
        }
    }
}

/// Isotropic 3x3 information matrix from a single sigma.
pub fn isotropic_info3(sigma: f64) -> Matrix3<f64> {
    let s = sigma.max(MIN_SIGMA);
    Matrix3::identity() / (s * s)
}

/// Isotropic 6x6 information matrix from a single sigma.
pub fn isotropic_info6(sigma: f64) -> Matrix6 {
    let s = sigma.max(MIN_SIGMA);
    Matrix6::identity() / (s * s)
}

/// Diagonal 6x6 information matrix from per-axis sigmas.
pub fn diagonal_info6(sigmas: &Vector6) -> Matrix6 {
    let mut info = Matrix6::zeros();
    for i in 0..6 {
        let s = sigmas[i].max(MIN_SIGMA);
        info[(i, i)] = 1.0 / (s * s);
    }
    info
}
