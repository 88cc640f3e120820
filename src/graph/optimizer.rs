//! Incremental fixed-structure smoother.
//!
//! The fusion graph is a chain: priors anchor key 0, and each new key k is
//! tied to k - 1 by one preintegrated IMU factor and one bias random-walk
//! factor, plus a unary pose prior from the LiDAR correction. The Hessian of
//! such a chain is block-tridiagonal in 15-dof state blocks (pose 6,
//! velocity 3, bias 6), so each Gauss-Newton step is solved exactly with a
//! block Thomas elimination in O(keys) time.
//!
//! `update()` performs a single linearize-solve-apply pass; callers issue a
//! second call when they want a relinearization pass over the same factors.
//! The marginal covariance of the newest key falls out of the forward
//! elimination and seeds the priors of the next graph generation after a
//! reseed.

use nalgebra::{Cholesky, Const, Matrix3, UnitQuaternion, Vector3};

use crate::core::math::{
    right_jacobian_so3_inv, skew, Matrix15, Matrix6, Vector15, Vector6, Vector9,
};
use crate::core::types::{ImuBias, Pose3D};
use crate::imu::PreintegratedImu;

use super::factors::{diagonal_info6, Factor};

type Matrix9x15 = nalgebra::SMatrix<f64, 9, 15>;

/// Estimated values at one key.
#[derive(Debug, Clone, Copy)]
pub struct KeyState {
    /// Pose estimate.
    pub pose: Pose3D,
    /// World-frame velocity estimate.
    pub velocity: Vector3<f64>,
    /// IMU bias estimate.
    pub bias: ImuBias,
}

impl KeyState {
    /// Create a key state.
    pub fn new(pose: Pose3D, velocity: Vector3<f64>, bias: ImuBias) -> Self {
        Self {
            pose,
            velocity,
            bias,
        }
    }

    /// Apply a 15-dof update [rotation, translation, velocity, accel bias,
    /// gyro bias]. Rotation applies on the right of the manifold element,
    /// everything else is additive.
    fn apply_delta(&mut self, dx: &Vector15) {
        let dphi: Vector3<f64> = dx.fixed_rows::<3>(0).into();
        self.pose.rotation *= UnitQuaternion::from_scaled_axis(dphi);
        self.pose.translation += Vector3::from(dx.fixed_rows::<3>(3));
        self.velocity += Vector3::from(dx.fixed_rows::<3>(6));
        self.bias.accel += Vector3::from(dx.fixed_rows::<3>(9));
        self.bias.gyro += Vector3::from(dx.fixed_rows::<3>(12));
    }
}

/// Outcome of one smoother update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The Gauss-Newton step was applied.
    Applied,
    /// The step increased the error and was rolled back.
    Reverted,
    /// The linear system was not positive definite.
    SolveFailed,
    /// Nothing to optimize.
    NoFactors,
}

/// Error before/after one smoother update.
#[derive(Debug, Clone, Copy)]
pub struct UpdateResult {
    /// Chi-squared error before the step.
    pub initial_error: f64,
    /// Chi-squared error after the step (equals `initial_error` unless the
    /// step was applied).
    pub final_error: f64,
    /// What happened to the step.
    pub status: UpdateStatus,
}

/// Configuration for the incremental smoother.
#[derive(Debug, Clone, Copy)]
pub struct SmootherConfig {
    /// Constant added to the Hessian diagonal for numerical safety.
    pub diagonal_damping: f64,
    /// A step whose error exceeds `initial * divergence_ratio` is rolled
    /// back.
    pub divergence_ratio: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            diagonal_damping: 1e-9,
            divergence_ratio: 1.1,
        }
    }
}

/// Chain-structured incremental Gauss-Newton smoother.
#[derive(Debug, Clone)]
pub struct IncrementalSmoother {
    config: SmootherConfig,
    states: Vec<KeyState>,
    factors: Vec<Factor>,
}

impl IncrementalSmoother {
    /// Create an empty smoother.
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            states: Vec::new(),
            factors: Vec::new(),
        }
    }

    /// Discard all keys and factors.
    pub fn reset(&mut self) {
        self.states.clear();
        self.factors.clear();
    }

    /// Insert the initial value for the next key. Keys are contiguous.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not the next key in the chain.
    pub fn insert(&mut self, key: usize, state: KeyState) {
        assert_eq!(key, self.states.len(), "keys must be inserted in order");
        self.states.push(state);
    }

    /// Add a factor over already-inserted keys.
    ///
    /// # Panics
    ///
    /// Panics if the factor references a key without a value.
    pub fn add_factor(&mut self, factor: Factor) {
        assert!(
            factor.key() < self.states.len(),
            "factor references key {} but only {} values exist",
            factor.key(),
            self.states.len()
        );
        self.factors.push(factor);
    }

    /// Number of keys with values.
    pub fn num_keys(&self) -> usize {
        self.states.len()
    }

    /// Number of factors in the graph.
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// Current estimate at a key.
    pub fn estimate(&self, key: usize) -> Option<&KeyState> {
        self.states.get(key)
    }

    /// Perform one linearize-solve-apply pass.
    pub fn update(&mut self) -> UpdateResult {
        if self.factors.is_empty() || self.states.is_empty() {
            return UpdateResult {
                initial_error: 0.0,
                final_error: 0.0,
                status: UpdateStatus::NoFactors,
            };
        }

        let initial_error = self.chi_squared();
        let (diag, upper, grad) = self.build_linear_system();

        let dx = match self.solve_block_tridiagonal(&diag, &upper, &grad) {
            Some(dx) => dx,
            None => {
                log::warn!("smoother linear system not positive definite, keeping estimate");
                return UpdateResult {
                    initial_error,
                    final_error: initial_error,
                    status: UpdateStatus::SolveFailed,
                };
            }
        };

        for (state, delta) in self.states.iter_mut().zip(dx.iter()) {
            state.apply_delta(delta);
        }

        let final_error = self.chi_squared();
        if initial_error > 0.0 && final_error > initial_error * self.config.divergence_ratio {
            // Roll back; Exp(phi) * Exp(-phi) cancels exactly, so the
            // revert restores the previous estimate.
            for (state, delta) in self.states.iter_mut().zip(dx.iter()) {
                state.apply_delta(&(-delta));
            }
            return UpdateResult {
                initial_error,
                final_error: initial_error,
                status: UpdateStatus::Reverted,
            };
        }

        UpdateResult {
            initial_error,
            final_error,
            status: UpdateStatus::Applied,
        }
    }

    /// Marginal covariance of the newest key at the current linearization
    /// point, ordered [rotation, translation, velocity, accel bias, gyro
    /// bias].
    ///
    /// Returns `None` when the graph is empty or the elimination fails.
    pub fn marginal_covariance_latest(&self) -> Option<Matrix15> {
        if self.states.is_empty() || self.factors.is_empty() {
            return None;
        }

        let (diag, upper, _) = self.build_linear_system();
        let n = diag.len();
        let damping = Matrix15::identity() * self.config.diagonal_damping;

        let mut c = diag[0] + damping;
        for k in 1..n {
            let chol = Cholesky::new(c)?;
            let u = upper[k - 1];
            let cinv_u = chol.solve(&u);
            c = diag[k] + damping - cinv_u.transpose() * u;
        }

        Some(Cholesky::new(c)?.inverse())
    }

    /// Total chi-squared error over all factors.
    pub fn chi_squared(&self) -> f64 {
        self.factors.iter().map(|f| self.factor_error(f)).sum()
    }

    fn factor_error(&self, factor: &Factor) -> f64 {
        match factor {
            Factor::PriorPose { key, pose, info } => {
                let r = pose_prior_residual(&self.states[*key].pose, pose);
                r.dot(&(info * r))
            }
            Factor::PriorVelocity {
                key,
                velocity,
                info,
            } => {
                let r = self.states[*key].velocity - velocity;
                r.dot(&(info * r))
            }
            Factor::PriorBias { key, bias, info } => {
                let r = bias_residual(&self.states[*key].bias, bias);
                r.dot(&(info * r))
            }
            Factor::Imu { key, preint } => {
                let terms = imu_terms(&self.states[*key - 1], &self.states[*key], preint);
                let omega = preint.information();
                terms.residual.dot(&(omega * terms.residual))
            }
            Factor::BiasBetween { key, sigmas } => {
                let r = bias_residual(&self.states[*key].bias, &self.states[*key - 1].bias);
                let info = diagonal_info6(sigmas);
                r.dot(&(info * r))
            }
        }
    }

    /// Build the block-tridiagonal normal equations H dx = -grad.
    ///
    /// Returns per-key diagonal blocks, super-diagonal blocks (block
    /// (k, k+1)), and the gradient.
    fn build_linear_system(&self) -> (Vec<Matrix15>, Vec<Matrix15>, Vec<Vector15>) {
        let n = self.states.len();
        let mut diag = vec![Matrix15::zeros(); n];
        let mut upper = vec![Matrix15::zeros(); n.saturating_sub(1)];
        let mut grad = vec![Vector15::zeros(); n];

        for factor in &self.factors {
            match factor {
                Factor::PriorPose { key, pose, info } => {
                    let state = &self.states[*key];
                    let r = pose_prior_residual(&state.pose, pose);
                    // Rotation block of the Jacobian; translation is identity.
                    let jr_inv = right_jacobian_so3_inv(&Vector3::from(r.fixed_rows::<3>(0)));
                    let mut j = Matrix6::identity();
                    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&jr_inv);

                    let jt_info = j.transpose() * info;
                    add_block6(&mut diag[*key], 0, 0, &(jt_info * j));
                    add_rows6(&mut grad[*key], 0, &(jt_info * r));
                }
                Factor::PriorVelocity {
                    key,
                    velocity,
                    info,
                } => {
                    let r = self.states[*key].velocity - velocity;
                    add_block3(&mut diag[*key], 6, 6, info);
                    add_rows3(&mut grad[*key], 6, &(info * r));
                }
                Factor::PriorBias { key, bias, info } => {
                    let r = bias_residual(&self.states[*key].bias, bias);
                    add_block6(&mut diag[*key], 9, 9, info);
                    add_rows6(&mut grad[*key], 9, &(info * r));
                }
                Factor::BiasBetween { key, sigmas } => {
                    let i = *key - 1;
                    let r = bias_residual(&self.states[*key].bias, &self.states[i].bias);
                    let info = diagonal_info6(sigmas);

                    add_block6(&mut diag[i], 9, 9, &info);
                    add_block6(&mut diag[*key], 9, 9, &info);
                    add_block6(&mut upper[i], 9, 9, &(-info));

                    let g = info * r;
                    add_rows6(&mut grad[i], 9, &(-g));
                    add_rows6(&mut grad[*key], 9, &g);
                }
                Factor::Imu { key, preint } => {
                    let i = *key - 1;
                    let si = &self.states[i];
                    let sj = &self.states[*key];
                    let terms = imu_terms(si, sj, preint);
                    let omega = preint.information();
                    let (ja, jb) = imu_jacobians(si, sj, preint, &terms);

                    let jat_o = ja.transpose() * omega;
                    let jbt_o = jb.transpose() * omega;

                    diag[i] += jat_o * ja;
                    diag[*key] += jbt_o * jb;
                    upper[i] += jat_o * jb;
                    grad[i] += jat_o * terms.residual;
                    grad[*key] += jbt_o * terms.residual;
                }
            }
        }

        (diag, upper, grad)
    }

    /// Exact solve of the block-tridiagonal system via forward elimination
    /// and back substitution (block Thomas algorithm).
    fn solve_block_tridiagonal(
        &self,
        diag: &[Matrix15],
        upper: &[Matrix15],
        grad: &[Vector15],
    ) -> Option<Vec<Vector15>> {
        let n = diag.len();
        let damping = Matrix15::identity() * self.config.diagonal_damping;

        let mut chols: Vec<Cholesky<f64, Const<15>>> = Vec::with_capacity(n);
        let mut d: Vec<Vector15> = Vec::with_capacity(n);

        let mut c = diag[0] + damping;
        d.push(-grad[0]);
        for k in 1..n {
            let chol = Cholesky::new(c)?;
            let u = upper[k - 1];
            let cinv_u = chol.solve(&u);
            c = diag[k] + damping - cinv_u.transpose() * u;
            let next_d = -grad[k] - cinv_u.transpose() * d[k - 1];
            chols.push(chol);
            d.push(next_d);
        }
        chols.push(Cholesky::new(c)?);

        let mut x = vec![Vector15::zeros(); n];
        x[n - 1] = chols[n - 1].solve(&d[n - 1]);
        for k in (0..n - 1).rev() {
            x[k] = chols[k].solve(&(d[k] - upper[k] * x[k + 1]));
        }

        Some(x)
    }
}

/// Residual of a pose prior, ordered [rotation, translation].
fn pose_prior_residual(estimate: &Pose3D, prior: &Pose3D) -> Vector6 {
    let r_rot = (prior.rotation.inverse() * estimate.rotation).scaled_axis();
    let r_trans = estimate.translation - prior.translation;
    let mut r = Vector6::zeros();
    r.fixed_rows_mut::<3>(0).copy_from(&r_rot);
    r.fixed_rows_mut::<3>(3).copy_from(&r_trans);
    r
}

/// Residual between two biases, ordered [accel, gyro].
fn bias_residual(estimate: &ImuBias, reference: &ImuBias) -> Vector6 {
    let mut r = Vector6::zeros();
    r.fixed_rows_mut::<3>(0)
        .copy_from(&(estimate.accel - reference.accel));
    r.fixed_rows_mut::<3>(3)
        .copy_from(&(estimate.gyro - reference.gyro));
    r
}

/// Intermediate values of the IMU residual shared with the Jacobians.
struct ImuTerms {
    residual: Vector9,
    /// R_i^T (v_j - v_i - g dt)
    rot_vtmp: Vector3<f64>,
    /// R_i^T (p_j - p_i - v_i dt - 0.5 g dt^2)
    rot_ptmp: Vector3<f64>,
}

/// 9-dim preintegration residual [rotation, velocity, position] between two
/// consecutive keys.
fn imu_terms(si: &KeyState, sj: &KeyState, preint: &PreintegratedImu) -> ImuTerms {
    let delta = preint.corrected_delta(&si.bias);
    let dt = preint.delta_t_ij();
    let g = preint.gravity();

    let rot_i_inv = si.pose.rotation.inverse();

    let r_rot = (delta.rotation.inverse() * (rot_i_inv * sj.pose.rotation)).scaled_axis();
    let rot_vtmp = rot_i_inv * (sj.velocity - si.velocity - g * dt);
    let r_vel = rot_vtmp - delta.velocity;
    let rot_ptmp = rot_i_inv
        * (sj.pose.translation - si.pose.translation - si.velocity * dt - 0.5 * g * dt * dt);
    let r_pos = rot_ptmp - delta.position;

    let mut residual = Vector9::zeros();
    residual.fixed_rows_mut::<3>(0).copy_from(&r_rot);
    residual.fixed_rows_mut::<3>(3).copy_from(&r_vel);
    residual.fixed_rows_mut::<3>(6).copy_from(&r_pos);

    ImuTerms {
        residual,
        rot_vtmp,
        rot_ptmp,
    }
}

/// Jacobians of the IMU residual with respect to the key i and key j blocks.
fn imu_jacobians(
    si: &KeyState,
    sj: &KeyState,
    preint: &PreintegratedImu,
    terms: &ImuTerms,
) -> (Matrix9x15, Matrix9x15) {
    let dt = preint.delta_t_ij();
    let rot_i = si.pose.rotation.to_rotation_matrix().into_inner();
    let rot_j = sj.pose.rotation.to_rotation_matrix().into_inner();
    let rot_i_t = rot_i.transpose();

    let r_rot: Vector3<f64> = terms.residual.fixed_rows::<3>(0).into();
    let jr_inv = right_jacobian_so3_inv(&r_rot);

    let mut ja = Matrix9x15::zeros();
    let mut jb = Matrix9x15::zeros();

    // Rotation rows.
    ja.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(-jr_inv * (rot_j.transpose() * rot_i)));
    ja.fixed_view_mut::<3, 3>(0, 12).copy_from(&(-preint.j_r_bg));
    jb.fixed_view_mut::<3, 3>(0, 0).copy_from(&jr_inv);

    // Velocity rows.
    ja.fixed_view_mut::<3, 3>(3, 0)
        .copy_from(&skew(&terms.rot_vtmp));
    ja.fixed_view_mut::<3, 3>(3, 6).copy_from(&(-rot_i_t));
    ja.fixed_view_mut::<3, 3>(3, 9).copy_from(&(-preint.j_v_ba));
    ja.fixed_view_mut::<3, 3>(3, 12).copy_from(&(-preint.j_v_bg));
    jb.fixed_view_mut::<3, 3>(3, 6).copy_from(&rot_i_t);

    // Position rows.
    ja.fixed_view_mut::<3, 3>(6, 0)
        .copy_from(&skew(&terms.rot_ptmp));
    ja.fixed_view_mut::<3, 3>(6, 3).copy_from(&(-rot_i_t));
    ja.fixed_view_mut::<3, 3>(6, 6).copy_from(&(-rot_i_t * dt));
    ja.fixed_view_mut::<3, 3>(6, 9).copy_from(&(-preint.j_p_ba));
    ja.fixed_view_mut::<3, 3>(6, 12).copy_from(&(-preint.j_p_bg));
    jb.fixed_view_mut::<3, 3>(6, 3).copy_from(&rot_i_t);

    (ja, jb)
}

fn add_block6(target: &mut Matrix15, row: usize, col: usize, block: &Matrix6) {
    for r in 0..6 {
        for c in 0..6 {
            target[(row + r, col + c)] += block[(r, c)];
        }
    }
}

fn add_block3(target: &mut Matrix15, row: usize, col: usize, block: &Matrix3<f64>) {
    for r in 0..3 {
        for c in 0..3 {
            target[(row + r, col + c)] += block[(r, c)];
        }
    }
}

fn add_rows6(target: &mut Vector15, offset: usize, values: &Vector6) {
    for i in 0..6 {
        target[offset + i] += values[i];
    }
}

fn add_rows3(target: &mut Vector15, offset: usize, values: &Vector3<f64>) {
    for i in 0..3 {
        target[offset + i] += values[i];
    }
}
