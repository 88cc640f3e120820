//! High-rate IMU forward propagation.

use std::collections::VecDeque;

use crate::core::math::dt_seconds;
use crate::core::types::{ImuBias, ImuOdometry, ImuSample, NavState, Pose3D};
use crate::imu::{PreintegratedImu, PreintegrationParams};

/// Forward-integrates IMU samples from the latest optimized state and bias,
/// emitting a pose at every sample.
///
/// Silent until the estimator publishes its first optimized state. After
/// every correction the estimator re-seeds the propagator: samples older
/// than the correction are dropped, the preintegrator is reset to the fresh
/// bias, and the remaining queue is replayed so subsequent samples continue
/// from the corrected state.
#[derive(Debug, Clone)]
pub struct ImuPropagator {
    imu_to_lidar: Pose3D,
    nominal_period_s: f64,
    queue: VecDeque<ImuSample>,
    preint: PreintegratedImu,
    state: NavState,
    bias: ImuBias,
    last_imu_t: Option<u64>,
    last_dt: f64,
    enabled: bool,
}

impl ImuPropagator {
    /// Create a disabled propagator.
    pub fn new(params: PreintegrationParams, imu_to_lidar: Pose3D, nominal_period_s: f64) -> Self {
        Self {
            imu_to_lidar,
            nominal_period_s,
            queue: VecDeque::new(),
            preint: PreintegratedImu::new(params, ImuBias::zero()),
            state: NavState::identity(),
            bias: ImuBias::zero(),
            last_imu_t: None,
            last_dt: nominal_period_s,
            enabled: false,
        }
    }

    /// Enqueue a sample and, once enabled, emit the propagated odometry.
    ///
    /// A sample with a non-increasing timestamp is integrated with the
    /// previous dt rather than a negative one.
    pub fn on_imu(&mut self, sample: ImuSample) -> Option<ImuOdometry> {
        self.queue.push_back(sample);

        if !self.enabled {
            return None;
        }

        let dt = match self.last_imu_t {
            None => self.nominal_period_s,
            Some(prev) => {
                let dt = dt_seconds(prev, sample.timestamp_us);
                if dt > 0.0 {
                    dt
                } else {
                    self.last_dt
                }
            }
        };
        self.last_imu_t = Some(sample.timestamp_us);
        self.last_dt = dt;

        self.preint.integrate(&sample.accel, &sample.gyro, dt);
        let predicted = self.preint.predict(&self.state, &self.bias);

        Some(ImuOdometry {
            timestamp_us: sample.timestamp_us,
            pose: predicted.pose.compose(&self.imu_to_lidar),
            linear_velocity: predicted.velocity,
            angular_velocity: sample.gyro + self.bias.gyro,
        })
    }

    /// Restart propagation from a freshly optimized state and bias.
    ///
    /// Drops queued samples older than the correction time, resets the
    /// preintegrator to the new bias, and replays the remaining samples in
    /// order.
    pub fn reseed(&mut self, state: NavState, bias: ImuBias, correction_t_us: u64) {
        self.state = state;
        self.bias = bias;

        let mut last_t: Option<u64> = None;
        while let Some(front) = self.queue.front() {
            if front.timestamp_us < correction_t_us {
                last_t = Some(front.timestamp_us);
                self.queue.pop_front();
            } else {
                break;
            }
        }

        self.preint.reset_with_bias(bias);
        for sample in &self.queue {
            let dt = match last_t {
                None => self.nominal_period_s,
                Some(prev) => dt_seconds(prev, sample.timestamp_us),
            };
            self.preint.integrate(&sample.accel, &sample.gyro, dt);
            last_t = Some(sample.timestamp_us);
        }

        self.enabled = true;
    }

    /// Stop emitting until the next reseed.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.last_imu_t = None;
    }

    /// Whether the propagator has been seeded by a successful optimization.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of queued samples.
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Timestamp of the oldest queued sample.
    #[inline]
    pub fn queue_front_timestamp(&self) -> Option<u64> {
        self.queue.front().map(|s| s.timestamp_us)
    }

    /// Total time currently accumulated in the preintegrator, seconds.
    #[inline]
    pub fn preintegrated_time(&self) -> f64 {
        self.preint.delta_t_ij()
    }
}
