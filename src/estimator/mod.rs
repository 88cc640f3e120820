//! IMU-LiDAR fusion estimator.
//!
//! `InertialEstimator` maintains a sliding factor graph over pose, velocity,
//! and IMU bias. Every LiDAR correction closes one preintegration window,
//! adds an IMU factor, a bias random-walk factor, and a pose prior at the
//! new key, and runs two incremental smoother updates. The optimized state
//! re-seeds the owned `ImuPropagator`, which emits IMU-rate odometry between
//! corrections.
//!
//! The graph is reseeded every `reseed_interval` corrections: marginal
//! covariances of the newest key are captured, the graph is discarded, and
//! fresh priors re-anchor key 0 at the last estimate. This bounds the
//! smoother's working set.

mod propagator;

pub use propagator::ImuPropagator;

use std::collections::VecDeque;

use nalgebra::{Matrix3, Vector3};

use crate::config::FusionConfig;
use crate::core::math::{dt_seconds, Matrix6, Vector6};
use crate::core::types::{ImuBias, ImuOdometry, ImuSample, LidarPose, NavState, Pose3D};
use crate::graph::{
    diagonal_info6, isotropic_info3, isotropic_info6, Factor, IncrementalSmoother, KeyState,
    SmootherConfig,
};
use crate::imu::{PreintegratedImu, PreintegrationParams};

/// Sigma of the initial pose prior (rad, m).
const PRIOR_POSE_SIGMA: f64 = 1e-2;
/// Sigma of the initial velocity prior (m/s). Deliberately loose.
const PRIOR_VEL_SIGMA: f64 = 1e4;
/// Sigma of the initial bias prior.
const PRIOR_BIAS_SIGMA: f64 = 1e-3;
/// Rotation sigma of a healthy LiDAR correction (rad).
const CORRECTION_ROT_SIGMA: f64 = 0.05;
/// Translation sigma of a healthy LiDAR correction (m).
const CORRECTION_TRANS_SIGMA: f64 = 0.1;
/// Sigma applied to all six axes of a degenerate correction.
const DEGENERATE_SIGMA: f64 = 1.0;

/// Outcome of one LiDAR correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionResult {
    /// First correction; the estimator initialized and seeded the
    /// propagator.
    Initialized,
    /// Normal optimization cycle completed and was published.
    Applied,
    /// No IMU samples were available; correction skipped.
    NoImuData,
    /// Correction timestamp did not increase; dropped.
    RejectedStale,
    /// Post-optimization sanity check failed; estimator reset.
    Diverged,
}

/// Incremental preintegration estimator with an owned high-rate propagator.
#[derive(Debug, Clone)]
pub struct InertialEstimator {
    reseed_interval: usize,
    nominal_imu_period_s: f64,
    max_velocity: f64,
    max_bias: f64,

    correction_info: Matrix6,
    correction_info_degenerate: Matrix6,
    /// Per-axis bias random-walk sigmas [accel, gyro], unscaled.
    bias_walk_sigmas: Vector6,

    lidar_to_imu: Pose3D,

    smoother: IncrementalSmoother,
    preint_opt: PreintegratedImu,
    opt_queue: VecDeque<ImuSample>,

    initialized: bool,
    key: usize,
    last_imu_t_opt: Option<u64>,
    last_correction_t: Option<u64>,

    prev_state: NavState,
    prev_bias: ImuBias,

    propagator: ImuPropagator,
}

impl InertialEstimator {
    /// Create an uninitialized estimator.
    pub fn new(config: &FusionConfig) -> Self {
        let params = PreintegrationParams::new(config.gravity, &config.noise);
        let (ba, bg) = config.noise.bias_walk_sigmas();
        let mut bias_walk_sigmas = Vector6::zeros();
        bias_walk_sigmas.fixed_rows_mut::<3>(0).copy_from(&ba);
        bias_walk_sigmas.fixed_rows_mut::<3>(3).copy_from(&bg);

        Self {
            reseed_interval: config.reseed_interval,
            nominal_imu_period_s: config.nominal_imu_period_s,
            max_velocity: config.max_velocity,
            max_bias: config.max_bias,
            correction_info: diagonal_info6(&Vector6::new(
                CORRECTION_ROT_SIGMA,
                CORRECTION_ROT_SIGMA,
                CORRECTION_ROT_SIGMA,
                CORRECTION_TRANS_SIGMA,
                CORRECTION_TRANS_SIGMA,
                CORRECTION_TRANS_SIGMA,
            )),
            correction_info_degenerate: isotropic_info6(DEGENERATE_SIGMA),
            bias_walk_sigmas,
            lidar_to_imu: config.lidar_to_imu(),
            smoother: IncrementalSmoother::new(SmootherConfig::default()),
            preint_opt: PreintegratedImu::new(params, ImuBias::zero()),
            opt_queue: VecDeque::new(),
            initialized: false,
            key: 0,
            last_imu_t_opt: None,
            last_correction_t: None,
            prev_state: NavState::identity(),
            prev_bias: ImuBias::zero(),
            propagator: ImuPropagator::new(
                params,
                config.imu_to_lidar(),
                config.nominal_imu_period_s,
            ),
        }
    }

    /// Ingest one IMU sample.
    ///
    /// The sample is enqueued for the next optimization window and forwarded
    /// to the propagator, which emits incremental odometry once the first
    /// optimization has completed.
    pub fn on_imu(&mut self, sample: ImuSample) -> Option<ImuOdometry> {
        self.opt_queue.push_back(sample);
        self.propagator.on_imu(sample)
    }

    /// Ingest one LiDAR pose correction and run an optimization step.
    pub fn on_lidar_pose(&mut self, correction: &LidarPose) -> CorrectionResult {
        if let Some(last) = self.last_correction_t {
            if correction.timestamp_us <= last {
                log::warn!(
                    "dropping non-increasing lidar correction at {} us (last {} us)",
                    correction.timestamp_us,
                    last
                );
                return CorrectionResult::RejectedStale;
            }
        }
        if self.opt_queue.is_empty() {
            return CorrectionResult::NoImuData;
        }
        self.last_correction_t = Some(correction.timestamp_us);

        let t_corr = correction.timestamp_us;
        let pose_in_imu = correction.pose.compose(&self.lidar_to_imu);

        if !self.initialized {
            self.initialize(t_corr, pose_in_imu);
            return CorrectionResult::Initialized;
        }

        if self.key == self.reseed_interval {
            self.reseed_graph();
        }

        self.drain_opt_queue(t_corr);

        // New key: initial values from the preintegrated prediction, factors
        // tying it to the previous key plus the correction prior.
        let predicted = self.preint_opt.predict(&self.prev_state, &self.prev_bias);
        self.smoother.insert(
            self.key,
            KeyState::new(predicted.pose, predicted.velocity, self.prev_bias),
        );
        self.smoother.add_factor(Factor::Imu {
            key: self.key,
            preint: self.preint_opt.clone(),
        });
        let sqrt_dt = self.preint_opt.delta_t_ij().sqrt();
        self.smoother.add_factor(Factor::BiasBetween {
            key: self.key,
            sigmas: self.bias_walk_sigmas * sqrt_dt,
        });
        self.smoother.add_factor(Factor::PriorPose {
            key: self.key,
            pose: pose_in_imu,
            info: if correction.degenerate {
                self.correction_info_degenerate
            } else {
                self.correction_info
            },
        });

        self.smoother.update();
        self.smoother.update();

        let estimate = *self
            .smoother
            .estimate(self.key)
            .expect("value inserted this cycle");
        self.prev_state = NavState::new(estimate.pose, estimate.velocity);
        self.prev_bias = estimate.bias;
        self.preint_opt.reset_with_bias(self.prev_bias);

        if self.failure_detected() {
            self.reset_params();
            return CorrectionResult::Diverged;
        }

        self.propagator
            .reseed(self.prev_state, self.prev_bias, t_corr);
        self.key += 1;

        CorrectionResult::Applied
    }

    /// First correction: anchor the graph at the LiDAR pose with zero
    /// velocity and bias.
    fn initialize(&mut self, t_corr: u64, pose: Pose3D) {
        self.smoother.reset();

        while let Some(front) = self.opt_queue.front() {
            if front.timestamp_us < t_corr {
                self.last_imu_t_opt = Some(front.timestamp_us);
                self.opt_queue.pop_front();
            } else {
                break;
            }
        }

        self.prev_state = NavState::new(pose, Vector3::zeros());
        self.prev_bias = ImuBias::zero();

        self.smoother
            .insert(0, KeyState::new(pose, Vector3::zeros(), self.prev_bias));
        self.smoother.add_factor(Factor::PriorPose {
            key: 0,
            pose,
            info: isotropic_info6(PRIOR_POSE_SIGMA),
        });
        self.smoother.add_factor(Factor::PriorVelocity {
            key: 0,
            velocity: Vector3::zeros(),
            info: isotropic_info3(PRIOR_VEL_SIGMA),
        });
        self.smoother.add_factor(Factor::PriorBias {
            key: 0,
            bias: self.prev_bias,
            info: isotropic_info6(PRIOR_BIAS_SIGMA),
        });
        self.smoother.update();

        self.preint_opt.reset_with_bias(self.prev_bias);
        self.key = 1;
        self.initialized = true;

        self.propagator
            .reseed(self.prev_state, self.prev_bias, t_corr);
    }

    /// Discard the graph and re-anchor key 0 at the current estimate using
    /// the captured marginal covariances as prior noise.
    fn reseed_graph(&mut self) {
        let (pose_info, vel_info, bias_info) = self
            .captured_marginal_infos()
            .unwrap_or_else(|| {
                log::warn!("marginal capture failed at reseed, falling back to initial priors");
                (
                    isotropic_info6(PRIOR_POSE_SIGMA),
                    isotropic_info3(PRIOR_VEL_SIGMA),
                    isotropic_info6(PRIOR_BIAS_SIGMA),
                )
            });

        self.smoother.reset();
        self.smoother.insert(
            0,
            KeyState::new(self.prev_state.pose, self.prev_state.velocity, self.prev_bias),
        );
        self.smoother.add_factor(Factor::PriorPose {
            key: 0,
            pose: self.prev_state.pose,
            info: pose_info,
        });
        self.smoother.add_factor(Factor::PriorVelocity {
            key: 0,
            velocity: self.prev_state.velocity,
            info: vel_info,
        });
        self.smoother.add_factor(Factor::PriorBias {
            key: 0,
            bias: self.prev_bias,
            info: bias_info,
        });
        self.smoother.update();

        self.key = 1;
    }

    /// Invert the pose/velocity/bias blocks of the newest key's marginal
    /// covariance. Cross-covariances between the three blocks are dropped,
    /// giving three independent Gaussian priors.
    fn captured_marginal_infos(&self) -> Option<(Matrix6, Matrix3<f64>, Matrix6)> {
        let cov = self.smoother.marginal_covariance_latest()?;

        let pose_cov: Matrix6 = cov.fixed_view::<6, 6>(0, 0).into_owned();
        let vel_cov: Matrix3<f64> = cov.fixed_view::<3, 3>(6, 6).into_owned();
        let bias_cov: Matrix6 = cov.fixed_view::<6, 6>(9, 9).into_owned();

        let pose_info = symmetrize6(&pose_cov.try_inverse()?);
        let vel_inv = vel_cov.try_inverse()?;
        let vel_info = 0.5 * (vel_inv + vel_inv.transpose());
        let bias_info = symmetrize6(&bias_cov.try_inverse()?);

        Some((pose_info, vel_info, bias_info))
    }

    /// Sanity check on the freshly optimized state.
    fn failure_detected(&self) -> bool {
        if self.prev_state.velocity.norm() > self.max_velocity {
            log::warn!(
                "large velocity ({:.1} m/s), resetting estimator",
                self.prev_state.velocity.norm()
            );
            return true;
        }
        if self.prev_bias.accel.norm() > self.max_bias || self.prev_bias.gyro.norm() > self.max_bias
        {
            log::warn!(
                "large bias (accel {:.3}, gyro {:.3}), resetting estimator",
                self.prev_bias.accel.norm(),
                self.prev_bias.gyro.norm()
            );
            return true;
        }
        false
    }

    /// Return to the uninitialized state; the next correction re-anchors.
    fn reset_params(&mut self) {
        self.initialized = false;
        self.last_imu_t_opt = None;
        self.propagator.disable();
    }

    /// Pop samples up to and including the correction time into the
    /// optimization preintegrator.
    fn drain_opt_queue(&mut self, t_corr: u64) {
        while let Some(front) = self.opt_queue.front().copied() {
            if front.timestamp_us > t_corr {
                break;
            }
            let dt = match self.last_imu_t_opt {
                None => self.nominal_imu_period_s,
                Some(prev) => dt_seconds(prev, front.timestamp_us),
            };
            self.preint_opt.integrate(&front.accel, &front.gyro, dt);
            self.last_imu_t_opt = Some(front.timestamp_us);
            self.opt_queue.pop_front();
        }
    }

    /// Whether the first correction has initialized the graph.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current key index; wraps back to 1 after a reseed.
    #[inline]
    pub fn key(&self) -> usize {
        self.key
    }

    /// Latest optimized state, once initialized.
    pub fn current_state(&self) -> Option<&NavState> {
        self.initialized.then_some(&self.prev_state)
    }

    /// Latest optimized bias, once initialized.
    pub fn current_bias(&self) -> Option<&ImuBias> {
        self.initialized.then_some(&self.prev_bias)
    }

    /// The owned high-rate propagator.
    pub fn propagator(&self) -> &ImuPropagator {
        &self.propagator
    }

    /// Samples waiting in the optimization queue.
    #[inline]
    pub fn opt_queue_len(&self) -> usize {
        self.opt_queue.len()
    }

    /// Timestamp of the oldest sample waiting in the optimization queue.
    #[inline]
    pub fn opt_queue_front_timestamp(&self) -> Option<u64> {
        self.opt_queue.front().map(|s| s.timestamp_us)
    }

    /// Time accumulated in the optimization preintegrator, seconds.
    #[inline]
    pub fn preintegrated_time(&self) -> f64 {
        self.preint_opt.delta_t_ij()
    }
}

fn symmetrize6(m: &Matrix6) -> Matrix6 {
    0.5 * (m + m.transpose())
}
