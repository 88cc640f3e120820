//! Estimator End-to-End Scenarios
//!
//! Synthetic IMU and LiDAR streams exercising the full optimization cycle:
//! - Cold start from stationary data
//! - Constant-velocity convergence
//! - Degenerate-correction down-weighting
//! - Graph reseed continuity
//! - Divergence detection and recovery
//!
//! Run with: `cargo test --test estimator_scenarios`

use approx::assert_relative_eq;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gati_odometry::{
    CorrectionResult, FusionConfig, ImuSample, InertialEstimator, LidarPose, Pose3D,
};

const G: f64 = 9.80511;
const IMU_PERIOD_US: u64 = 2_000; // 500 Hz
const CORRECTION_PERIOD_US: u64 = 100_000; // 10 Hz

// ============================================================================
// Synthetic streams
// ============================================================================

/// IMU sample of a platform at rest (or unaccelerated): the accelerometer
/// reads the gravity reaction, the gyro reads zero.
fn coasting_sample(t_us: u64) -> ImuSample {
    ImuSample::new(t_us, Vector3::new(0.0, 0.0, G), Vector3::zeros())
}

/// LiDAR pose of a platform moving along +x at a constant speed.
fn lidar_pose_at(t_us: u64, speed_x: f64) -> LidarPose {
    let x = speed_x * t_us as f64 * 1e-6;
    LidarPose::new(t_us, Pose3D::from_translation(Vector3::new(x, 0.0, 0.0)), false)
}

/// Drive `estimator` through IMU samples in [from_us, to_us).
fn feed_imu(estimator: &mut InertialEstimator, from_us: u64, to_us: u64) {
    let mut t = from_us;
    while t < to_us {
        estimator.on_imu(coasting_sample(t));
        t += IMU_PERIOD_US;
    }
}

// ============================================================================
// Scenario: cold start
// ============================================================================

#[test]
fn test_cold_start_initializes_at_correction() {
    let mut estimator = InertialEstimator::new(&FusionConfig::default());

    // 100 stationary samples before the first correction.
    let mut emitted = 0;
    for i in 0..100u64 {
        if estimator.on_imu(coasting_sample(i * IMU_PERIOD_US)).is_some() {
            emitted += 1;
        }
    }
    assert_eq!(emitted, 0, "no incremental odometry before the first correction");

    let result = estimator.on_lidar_pose(&LidarPose::new(200_000, Pose3D::identity(), false));
    assert_eq!(result, CorrectionResult::Initialized);
    assert_eq!(estimator.key(), 1);

    let state = estimator.current_state().expect("running");
    assert_relative_eq!(state.pose.translation, Vector3::zeros(), epsilon = 1e-9);
    assert_relative_eq!(state.velocity, Vector3::zeros(), epsilon = 1e-9);

    let bias = estimator.current_bias().expect("running");
    assert_relative_eq!(bias.accel, Vector3::zeros(), epsilon = 1e-9);
    assert_relative_eq!(bias.gyro, Vector3::zeros(), epsilon = 1e-9);

    // The propagator starts emitting right after the correction.
    let odom = estimator
        .on_imu(coasting_sample(202_000))
        .expect("incremental odometry after init");
    assert_eq!(odom.timestamp_us, 202_000);
    assert_relative_eq!(odom.pose.translation, Vector3::zeros(), epsilon = 1e-6);
}

#[test]
fn test_cold_start_with_extrinsic_translation() {
    let config = FusionConfig {
        ext_trans: Vector3::new(0.05, -0.02, 0.1),
        ..Default::default()
    };
    let mut estimator = InertialEstimator::new(&config);
    feed_imu(&mut estimator, 0, 200_000);
    estimator.on_lidar_pose(&LidarPose::new(200_000, Pose3D::identity(), false));

    // Identity LiDAR pose lands at the extrinsic offset in the IMU frame.
    let state = estimator.current_state().expect("running");
    assert_relative_eq!(state.pose.translation, config.ext_trans, epsilon = 1e-9);

    // The incremental output is transformed back into the LiDAR frame.
    let odom = estimator
        .on_imu(coasting_sample(202_000))
        .expect("incremental odometry");
    assert_relative_eq!(odom.pose.translation, Vector3::zeros(), epsilon = 1e-6);
}

// ============================================================================
// Scenario: constant velocity
// ============================================================================

#[test]
fn test_constant_velocity_convergence() {
    let mut estimator = InertialEstimator::new(&FusionConfig::default());
    let speed = 1.0;

    let mut t_corr = 200_000u64;
    feed_imu(&mut estimator, 0, t_corr + 1);
    estimator.on_lidar_pose(&lidar_pose_at(t_corr, speed));

    for _ in 0..10 {
        let next = t_corr + CORRECTION_PERIOD_US;
        feed_imu(&mut estimator, t_corr + 1, next + 1);
        let result = estimator.on_lidar_pose(&lidar_pose_at(next, speed));
        assert_eq!(result, CorrectionResult::Applied);
        t_corr = next;
    }

    let state = estimator.current_state().expect("running");
    assert_relative_eq!(state.velocity.x, speed, epsilon = 0.05);
    assert!(state.velocity.y.abs() < 0.05);
    assert!(state.velocity.z.abs() < 0.05);

    let bias = estimator.current_bias().expect("running");
    assert!(bias.accel.norm() < 0.1, "accel bias: {}", bias.accel.norm());
}

#[test]
fn test_constant_velocity_with_noisy_imu() {
    let mut estimator = InertialEstimator::new(&FusionConfig::default());
    let mut rng = StdRng::seed_from_u64(42);
    let speed = 1.0;

    let mut noisy_sample = |t_us: u64| {
        let noise = Vector3::new(
            rng.gen_range(-0.02..0.02),
            rng.gen_range(-0.02..0.02),
            rng.gen_range(-0.02..0.02),
        );
        let gyro_noise = Vector3::new(
            rng.gen_range(-0.002..0.002),
            rng.gen_range(-0.002..0.002),
            rng.gen_range(-0.002..0.002),
        );
        ImuSample::new(t_us, Vector3::new(0.0, 0.0, G) + noise, gyro_noise)
    };

    let mut t = 0u64;
    while t <= 200_000 {
        estimator.on_imu(noisy_sample(t));
        t += IMU_PERIOD_US;
    }
    estimator.on_lidar_pose(&lidar_pose_at(200_000, speed));

    let mut t_corr = 200_000u64;
    for _ in 0..10 {
        let next = t_corr + CORRECTION_PERIOD_US;
        let mut t = t_corr + IMU_PERIOD_US;
        while t <= next {
            estimator.on_imu(noisy_sample(t));
            t += IMU_PERIOD_US;
        }
        assert_eq!(
            estimator.on_lidar_pose(&lidar_pose_at(next, speed)),
            CorrectionResult::Applied
        );
        t_corr = next;
    }

    let state = estimator.current_state().expect("running");
    assert_relative_eq!(state.velocity.x, speed, epsilon = 0.1);
    let bias = estimator.current_bias().expect("running");
    assert!(bias.accel.norm() < 0.1, "accel bias: {}", bias.accel.norm());
    assert!(bias.gyro.norm() < 0.05, "gyro bias: {}", bias.gyro.norm());
}

// ============================================================================
// Scenario: degenerate correction
// ============================================================================

#[test]
fn test_degenerate_correction_is_down_weighted() {
    let mut estimator = InertialEstimator::new(&FusionConfig::default());
    let speed = 1.0;

    let mut t_corr = 200_000u64;
    feed_imu(&mut estimator, 0, t_corr + 1);
    estimator.on_lidar_pose(&lidar_pose_at(t_corr, speed));

    for _ in 0..4 {
        let next = t_corr + CORRECTION_PERIOD_US;
        feed_imu(&mut estimator, t_corr + 1, next + 1);
        estimator.on_lidar_pose(&lidar_pose_at(next, speed));
        t_corr = next;
    }

    // One degenerate correction 0.5 m off the true trajectory.
    let next = t_corr + CORRECTION_PERIOD_US;
    feed_imu(&mut estimator, t_corr + 1, next + 1);
    let true_x = speed * next as f64 * 1e-6;
    let outlier = LidarPose::new(
        next,
        Pose3D::from_translation(Vector3::new(true_x + 0.5, 0.0, 0.0)),
        true,
    );
    assert_eq!(estimator.on_lidar_pose(&outlier), CorrectionResult::Applied);
    t_corr = next;

    // The wide noise keeps the estimate close to the inertially predicted
    // trajectory instead of snapping to the outlier.
    let state = estimator.current_state().expect("running");
    let deviation = (state.pose.translation.x - true_x).abs();
    assert!(
        deviation < 0.1,
        "estimate pulled {} m toward a degenerate outlier",
        deviation
    );

    // Healthy corrections recover the trajectory.
    for _ in 0..4 {
        let next = t_corr + CORRECTION_PERIOD_US;
        feed_imu(&mut estimator, t_corr + 1, next + 1);
        estimator.on_lidar_pose(&lidar_pose_at(next, speed));
        t_corr = next;
    }
    let state = estimator.current_state().expect("running");
    let true_x = speed * t_corr as f64 * 1e-6;
    assert_relative_eq!(state.pose.translation.x, true_x, epsilon = 0.05);
}

// ============================================================================
// Scenario: reseed boundary
// ============================================================================

#[test]
fn test_reseed_preserves_estimate() {
    let config = FusionConfig::default();
    let mut estimator = InertialEstimator::new(&config);

    let mut t_corr = 200_000u64;
    feed_imu(&mut estimator, 0, t_corr + 1);
    estimator.on_lidar_pose(&LidarPose::new(t_corr, Pose3D::identity(), false));

    // 99 more corrections bring the key to the reseed interval.
    for _ in 0..99 {
        let next = t_corr + CORRECTION_PERIOD_US;
        feed_imu(&mut estimator, t_corr + 1, next + 1);
        assert_eq!(
            estimator.on_lidar_pose(&LidarPose::new(next, Pose3D::identity(), false)),
            CorrectionResult::Applied
        );
        t_corr = next;
    }
    assert_eq!(estimator.key(), config.reseed_interval);

    let state_before = *estimator.current_state().expect("running");
    let bias_before = *estimator.current_bias().expect("running");

    // The next correction reseeds the graph before optimizing.
    let next = t_corr + CORRECTION_PERIOD_US;
    feed_imu(&mut estimator, t_corr + 1, next + 1);
    assert_eq!(
        estimator.on_lidar_pose(&LidarPose::new(next, Pose3D::identity(), false)),
        CorrectionResult::Applied
    );

    // Key wrapped around and the estimate carried over.
    assert_eq!(estimator.key(), 2);
    let state_after = estimator.current_state().expect("running");
    let bias_after = estimator.current_bias().expect("running");
    assert_relative_eq!(
        state_after.pose.translation,
        state_before.pose.translation,
        epsilon = 1e-4
    );
    assert_relative_eq!(state_after.velocity, state_before.velocity, epsilon = 1e-4);
    assert_relative_eq!(bias_after.accel, bias_before.accel, epsilon = 1e-4);
    assert_relative_eq!(bias_after.gyro, bias_before.gyro, epsilon = 1e-4);
}

#[test]
fn test_key_stays_in_bounds_over_many_corrections() {
    let config = FusionConfig::default();
    let mut estimator = InertialEstimator::new(&config);

    let mut t_corr = 200_000u64;
    feed_imu(&mut estimator, 0, t_corr + 1);
    estimator.on_lidar_pose(&LidarPose::new(t_corr, Pose3D::identity(), false));

    // Enough corrections to cross the reseed boundary with margin.
    for _ in 0..120 {
        let next = t_corr + CORRECTION_PERIOD_US;
        feed_imu(&mut estimator, t_corr + 1, next + 1);
        estimator.on_lidar_pose(&LidarPose::new(next, Pose3D::identity(), false));
        t_corr = next;

        let key = estimator.key();
        assert!(
            (1..=config.reseed_interval).contains(&key),
            "key out of bounds: {}",
            key
        );
    }
}

// ============================================================================
// Scenario: failure & recovery
// ============================================================================

#[test]
fn test_failure_detection_and_recovery() {
    let mut estimator = InertialEstimator::new(&FusionConfig::default());

    feed_imu(&mut estimator, 0, 200_001);
    estimator.on_lidar_pose(&LidarPose::new(200_000, Pose3D::identity(), false));
    assert!(estimator.propagator().is_enabled());

    // Two seconds of violent uncompensated acceleration while the LiDAR
    // pose holds still: the optimized velocity blows past the threshold.
    let mut t = 200_001u64;
    while t < 2_200_000 {
        estimator.on_imu(ImuSample::new(
            t,
            Vector3::new(40.0, 0.0, G),
            Vector3::zeros(),
        ));
        t += IMU_PERIOD_US;
    }
    let result = estimator.on_lidar_pose(&LidarPose::new(2_200_000, Pose3D::identity(), false));
    assert_eq!(result, CorrectionResult::Diverged);
    assert!(!estimator.is_initialized());
    assert!(!estimator.propagator().is_enabled());

    // The propagator is silent while uninitialized.
    assert!(estimator.on_imu(coasting_sample(2_202_000)).is_none());

    // The next correction re-initializes from scratch.
    feed_imu(&mut estimator, 2_204_000, 2_300_001);
    let result = estimator.on_lidar_pose(&LidarPose::new(2_300_000, Pose3D::identity(), false));
    assert_eq!(result, CorrectionResult::Initialized);
    let state = estimator.current_state().expect("re-initialized");
    assert_relative_eq!(state.velocity, Vector3::zeros(), epsilon = 1e-9);
}
