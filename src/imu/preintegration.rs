//! On-manifold IMU preintegration.
//!
//! Accumulates a contiguous window of IMU samples into a single relative
//! motion measurement (delta rotation, velocity, position) parameterized by
//! a fixed bias, following the on-manifold preintegration framework of
//! Forster et al. The accumulated deltas live in the body frame of the
//! window start; gravity is applied only when predicting.
//!
//! Alongside the mean deltas, the integrator propagates a 9x9 covariance
//! over [delta-theta, delta-v, delta-p] and the Jacobians of the deltas with
//! respect to the linearization bias, enabling first-order bias correction
//! without re-integration.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::core::math::{right_jacobian_so3, skew, Matrix9};
use crate::core::types::{ImuBias, NavState};

use super::noise::PreintegrationParams;

/// Bias-corrected preintegrated deltas.
#[derive(Debug, Clone, Copy)]
pub struct CorrectedDelta {
    /// Relative rotation over the window.
    pub rotation: UnitQuaternion<f64>,
    /// Velocity change in the start-of-window body frame.
    pub velocity: Vector3<f64>,
    /// Position change in the start-of-window body frame.
    pub position: Vector3<f64>,
}

/// Preintegrated inertial measurement between two correction times.
#[derive(Debug, Clone)]
pub struct PreintegratedImu {
    params: PreintegrationParams,
    bias: ImuBias,
    delta_rot: UnitQuaternion<f64>,
    delta_vel: Vector3<f64>,
    delta_pos: Vector3<f64>,
    delta_t: f64,
    covariance: Matrix9,
    pub(crate) j_r_bg: Matrix3<f64>,
    pub(crate) j_v_bg: Matrix3<f64>,
    pub(crate) j_v_ba: Matrix3<f64>,
    pub(crate) j_p_bg: Matrix3<f64>,
    pub(crate) j_p_ba: Matrix3<f64>,
}

impl PreintegratedImu {
    /// Create an empty preintegration with the given linearization bias.
    pub fn new(params: PreintegrationParams, bias: ImuBias) -> Self {
        Self {
            params,
            bias,
            delta_rot: UnitQuaternion::identity(),
            delta_vel: Vector3::zeros(),
            delta_pos: Vector3::zeros(),
            delta_t: 0.0,
            covariance: Matrix9::zeros(),
            j_r_bg: Matrix3::zeros(),
            j_v_bg: Matrix3::zeros(),
            j_v_ba: Matrix3::zeros(),
            j_p_bg: Matrix3::zeros(),
            j_p_ba: Matrix3::zeros(),
        }
    }

    /// Discard the accumulated window and re-linearize at `bias`.
    pub fn reset_with_bias(&mut self, bias: ImuBias) {
        *self = Self::new(self.params, bias);
    }

    /// Integrate one sample over `dt` seconds.
    ///
    /// Samples with non-positive `dt` are dropped.
    pub fn integrate(&mut self, accel: &Vector3<f64>, gyro: &Vector3<f64>, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        let a = self.bias.correct_accel(accel);
        let w = self.bias.correct_gyro(gyro);

        let angle_axis = w * dt;
        let rot_inc = UnitQuaternion::from_scaled_axis(angle_axis);
        let rot_inc_mat = rot_inc.to_rotation_matrix().into_inner();
        // Rotation of the window so far, before this sample.
        let rot = self.delta_rot.to_rotation_matrix().into_inner();

        let jr = right_jacobian_so3(&angle_axis);
        let skew_a = skew(&a);

        // State transition for [delta-theta, delta-v, delta-p]:
        //   A = | R_inc^T            0      0 |
        //       | -R [a]x dt         I      0 |
        //       | -0.5 R [a]x dt^2   I dt   I |
        let mut a_mat = Matrix9::identity();
        a_mat
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&rot_inc_mat.transpose());
        a_mat
            .fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(-rot * skew_a * dt));
        a_mat
            .fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&(-0.5 * rot * skew_a * dt * dt));
        a_mat
            .fixed_view_mut::<3, 3>(6, 3)
            .copy_from(&(Matrix3::identity() * dt));

        // Noise enters through the gyro (rotation row) and accelerometer
        // (velocity/position rows); continuous-time densities discretize as
        // sigma^2 / dt.
        let gyr_var = self.params.gyr_sigma * self.params.gyr_sigma / dt;
        let acc_var = self.params.acc_sigma * self.params.acc_sigma / dt;
        let int_var = self.params.integration_sigma * self.params.integration_sigma * dt;

        let b_rot = jr * dt;
        let b_vel = rot * dt;
        let b_pos = 0.5 * rot * dt * dt;

        let mut noise = Matrix9::zeros();
        noise
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(gyr_var * b_rot * b_rot.transpose()));
        let vv = acc_var * b_vel * b_vel.transpose();
        let vp = acc_var * b_vel * b_pos.transpose();
        let pp = acc_var * b_pos * b_pos.transpose() + Matrix3::identity() * int_var;
        noise.fixed_view_mut::<3, 3>(3, 3).copy_from(&vv);
        noise.fixed_view_mut::<3, 3>(3, 6).copy_from(&vp);
        noise
            .fixed_view_mut::<3, 3>(6, 3)
            .copy_from(&vp.transpose());
        noise.fixed_view_mut::<3, 3>(6, 6).copy_from(&pp);

        self.covariance = a_mat * self.covariance * a_mat.transpose() + noise;

        // Bias Jacobian recursions (first-order, Forster et al. appendix).
        self.j_p_bg =
            self.j_p_bg + self.j_v_bg * dt - 0.5 * rot * skew_a * self.j_r_bg * dt * dt;
        self.j_p_ba = self.j_p_ba + self.j_v_ba * dt - 0.5 * rot * dt * dt;
        self.j_v_bg = self.j_v_bg - rot * skew_a * self.j_r_bg * dt;
        self.j_v_ba = self.j_v_ba - rot * dt;
        self.j_r_bg = rot_inc_mat.transpose() * self.j_r_bg - jr * dt;

        // Mean update; position and velocity use the pre-update rotation.
        self.delta_pos += self.delta_vel * dt + 0.5 * rot * a * dt * dt;
        self.delta_vel += rot * a * dt;
        self.delta_rot *= rot_inc;
        self.delta_t += dt;
    }

    /// Deltas corrected to first order for a bias differing from the
    /// linearization point.
    pub fn corrected_delta(&self, bias: &ImuBias) -> CorrectedDelta {
        let dbg = bias.gyro - self.bias.gyro;
        let dba = bias.accel - self.bias.accel;

        let rotation = self.delta_rot * UnitQuaternion::from_scaled_axis(self.j_r_bg * dbg);
        let velocity = self.delta_vel + self.j_v_bg * dbg + self.j_v_ba * dba;
        let position = self.delta_pos + self.j_p_bg * dbg + self.j_p_ba * dba;

        CorrectedDelta {
            rotation,
            velocity,
            position,
        }
    }

    /// Predict the state at the window end from the state at the window
    /// start, applying gravity over the interval.
    pub fn predict(&self, state: &NavState, bias: &ImuBias) -> NavState {
        let delta = self.corrected_delta(bias);
        let dt = self.delta_t;
        let g = self.params.gravity;

        let rot_i = state.pose.rotation;
        let pose = crate::core::types::Pose3D::new(
            rot_i * delta.rotation,
            state.pose.translation + state.velocity * dt + 0.5 * g * dt * dt + rot_i * delta.position,
        );
        let velocity = state.velocity + g * dt + rot_i * delta.velocity;

        NavState::new(pose, velocity)
    }

    /// Total integrated time of the window, seconds.
    #[inline]
    pub fn delta_t_ij(&self) -> f64 {
        self.delta_t
    }

    /// Linearization bias of the window.
    #[inline]
    pub fn linearization_bias(&self) -> &ImuBias {
        &self.bias
    }

    /// Covariance over [delta-theta, delta-v, delta-p].
    #[inline]
    pub fn covariance(&self) -> &Matrix9 {
        &self.covariance
    }

    /// World-frame gravity vector used by this window.
    #[inline]
    pub fn gravity(&self) -> Vector3<f64> {
        self.params.gravity
    }

    /// Information matrix (regularized inverse covariance) for the factor.
    pub fn information(&self) -> Matrix9 {
        let regularized = self.covariance + Matrix9::identity() * 1e-10;
        regularized
            .try_inverse()
            .unwrap_or_else(|| Matrix9::identity() * 1e10)
    }
}
