//! Fusion Anchoring Tests
//!
//! Drives the estimator, propagator, and fusion stage together with
//! synthetic streams to verify:
//! - Fused output timestamps follow the newest IMU sample
//! - Anchor steps appear immediately at the next fused sample
//! - The inter-correction delta is preserved across anchor changes
//! - Trailing-path spacing and window invariants
//! - The stationary identity-anchor law
//!
//! Run with: `cargo test --test fusion_anchoring`

use approx::assert_relative_eq;
use nalgebra::Vector3;

use gati_odometry::{
    FusionConfig, FusionOutput, ImuSample, InertialEstimator, LidarPose, PoseFusion, Pose3D,
};

const G: f64 = 9.80511;
const IMU_PERIOD_US: u64 = 2_000; // 500 Hz

/// Estimator and fusion chained in-process, mirroring the node wiring.
struct Pipeline {
    estimator: InertialEstimator,
    fusion: PoseFusion,
}

impl Pipeline {
    fn new(config: &FusionConfig) -> Self {
        Self {
            estimator: InertialEstimator::new(config),
            fusion: PoseFusion::new(config),
        }
    }

    fn imu(&mut self, sample: ImuSample) -> Option<FusionOutput> {
        let odom = self.estimator.on_imu(sample)?;
        self.fusion.on_imu_odometry(odom)
    }

    fn lidar(&mut self, correction: &LidarPose) {
        self.estimator.on_lidar_pose(correction);
        self.fusion.on_lidar_pose(correction);
    }
}

fn coasting_sample(t_us: u64) -> ImuSample {
    ImuSample::new(t_us, Vector3::new(0.0, 0.0, G), Vector3::zeros())
}

/// Warm a pipeline into the running state with an identity anchor at 0.2 s.
fn warmed_pipeline(config: &FusionConfig) -> (Pipeline, u64) {
    let mut pipeline = Pipeline::new(config);
    let mut t = 0u64;
    while t <= 200_000 {
        pipeline.imu(coasting_sample(t));
        t += IMU_PERIOD_US;
    }
    pipeline.lidar(&LidarPose::new(200_000, Pose3D::identity(), false));
    (pipeline, 200_000)
}

#[test]
fn test_fused_timestamp_matches_last_imu_sample() {
    let (mut pipeline, t0) = warmed_pipeline(&FusionConfig::default());

    let mut t = t0 + IMU_PERIOD_US;
    for _ in 0..50 {
        let out = pipeline.imu(coasting_sample(t)).expect("fused output");
        assert_eq!(out.odometry.timestamp_us, t);
        assert_eq!(out.odom_to_body.timestamp_us, t);
        t += IMU_PERIOD_US;
    }
}

#[test]
fn test_stationary_identity_anchor_law() {
    let (mut pipeline, t0) = warmed_pipeline(&FusionConfig::default());

    // One second of zero-motion samples: the fused output stays within
    // bias-integration tolerance of the anchor.
    let mut t = t0 + IMU_PERIOD_US;
    let mut max_drift: f64 = 0.0;
    while t <= t0 + 1_000_000 {
        if let Some(out) = pipeline.imu(coasting_sample(t)) {
            max_drift = max_drift.max(out.odometry.pose.translation.norm());
        }
        t += IMU_PERIOD_US;
    }
    assert!(max_drift < 1e-3, "drift over 1 s: {} m", max_drift);
}

#[test]
fn test_anchor_step_applied_without_smoothing() {
    let (mut pipeline, t0) = warmed_pipeline(&FusionConfig::default());

    // Coast to 1.0 s, collecting the last fused pose before the step.
    let mut t = t0 + IMU_PERIOD_US;
    let mut last_before = None;
    while t < 1_000_000 {
        if let Some(out) = pipeline.imu(coasting_sample(t)) {
            last_before = Some(out.odometry.pose);
        }
        t += IMU_PERIOD_US;
    }
    let before = last_before.expect("output before the step");
    assert_relative_eq!(before.translation.x, 0.0, epsilon = 1e-3);

    // Correction at 1.0 s with a 0.3 m step.
    pipeline.lidar(&LidarPose::new(
        1_000_000,
        Pose3D::from_translation(Vector3::new(0.3, 0.0, 0.0)),
        false,
    ));

    // The very next fused sample carries the full step.
    let out = pipeline
        .imu(coasting_sample(1_000_000 + IMU_PERIOD_US))
        .expect("fused output after the step");
    assert_relative_eq!(out.odometry.pose.translation.x, 0.3, epsilon = 1e-3);
}

#[test]
fn test_inter_correction_delta_preserved_across_step() {
    // A moving platform: the delta accumulated between corrections must ride
    // on top of the stepped anchor rather than being reset by it.
    let config = FusionConfig::default();
    let mut pipeline = Pipeline::new(&config);
    let speed = 1.0; // m/s along x

    let mut t = 0u64;
    while t <= 200_000 {
        pipeline.imu(coasting_sample(t));
        t += IMU_PERIOD_US;
    }
    let pose_at = |t_us: u64| {
        Pose3D::from_translation(Vector3::new(speed * t_us as f64 * 1e-6, 0.0, 0.0))
    };
    pipeline.lidar(&LidarPose::new(200_000, pose_at(200_000), false));

    // Teach the estimator the velocity over a few corrections.
    let mut t_corr = 200_000u64;
    for _ in 0..5 {
        let next = t_corr + 100_000;
        let mut t = t_corr + IMU_PERIOD_US;
        while t <= next {
            pipeline.imu(coasting_sample(t));
            t += IMU_PERIOD_US;
        }
        pipeline.lidar(&LidarPose::new(next, pose_at(next), false));
        t_corr = next;
    }

    // Accumulate 50 ms of motion past the last anchor.
    let mut t = t_corr + IMU_PERIOD_US;
    let mut last = None;
    while t <= t_corr + 50_000 {
        if let Some(out) = pipeline.imu(coasting_sample(t)) {
            last = Some(out.odometry.pose.translation.x);
        }
        t += IMU_PERIOD_US;
    }
    let fused_x = last.expect("fused output");
    let expected = speed * (t_corr as f64 + 50_000.0) * 1e-6;
    assert_relative_eq!(fused_x, expected, epsilon = 0.02);
}

#[test]
fn test_trailing_path_invariants() {
    let config = FusionConfig::default();
    let (mut pipeline, t0) = warmed_pipeline(&config);

    // Two seconds with 10 Hz re-anchoring, checking every path snapshot.
    let mut t_corr = t0;
    let mut t = t0 + IMU_PERIOD_US;
    let mut snapshots = 0;
    while t <= t0 + 2_000_000 {
        if t >= t_corr + 100_000 {
            pipeline.lidar(&LidarPose::new(t, Pose3D::identity(), false));
            t_corr = t;
        }
        if let Some(out) = pipeline.imu(coasting_sample(t)) {
            if let Some(path) = out.path {
                snapshots += 1;
                for sample in &path.samples {
                    // Entries never predate the window behind the anchor.
                    assert!(
                        sample.timestamp_us + config.path_window_us >= t_corr,
                        "path entry {} older than anchor {} - 1 s",
                        sample.timestamp_us,
                        t_corr
                    );
                    // Entries never come from the future.
                    assert!(sample.timestamp_us <= out.odometry.timestamp_us);
                }
                for pair in path.samples.windows(2) {
                    assert!(
                        pair[1].timestamp_us - pair[0].timestamp_us > config.path_interval_us,
                        "path samples closer than the configured interval"
                    );
                }
            }
        }
        t += IMU_PERIOD_US;
    }
    assert!(snapshots > 10, "snapshots: {}", snapshots);
}

#[test]
fn test_frame_relations_published_with_output() {
    let config = FusionConfig {
        lidar_to_baselink: Some(Pose3D::from_translation(Vector3::new(0.0, 0.0, -0.4))),
        ..Default::default()
    };
    let (mut pipeline, t0) = warmed_pipeline(&config);

    let out = pipeline
        .imu(coasting_sample(t0 + IMU_PERIOD_US))
        .expect("fused output");

    assert_eq!(out.map_to_odom.parent, config.map_frame);
    assert_eq!(out.map_to_odom.child, config.odometry_frame);
    assert_eq!(out.map_to_odom.pose, Pose3D::identity());

    assert_eq!(out.odom_to_body.parent, config.odometry_frame);
    assert_eq!(out.odom_to_body.child, config.baselink_frame);
    assert_relative_eq!(out.odom_to_body.pose.translation.z, -0.4, epsilon = 1e-9);
}
