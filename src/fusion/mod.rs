//! LiDAR-anchored pose fusion.
//!
//! Combines the authoritative low-rate LiDAR pose with the incremental
//! IMU-rate stream: the delta accumulated since the anchor time is applied
//! on top of the anchor pose, so the published stream re-snaps to every
//! correction while keeping smooth IMU-rate motion in between.

use std::collections::VecDeque;

use crate::config::FusionConfig;
use crate::core::types::{
    FrameTransform, FusedOdometry, ImuOdometry, LidarPose, PathSample, Pose3D, TrailingPath,
};

/// Everything published for one fused-odometry tick.
#[derive(Debug, Clone)]
pub struct FusionOutput {
    /// LiDAR-anchored IMU-rate odometry.
    pub odometry: FusedOdometry,
    /// map-to-odom relation (identity by construction).
    pub map_to_odom: FrameTransform,
    /// odom-to-body relation at the fused pose.
    pub odom_to_body: FrameTransform,
    /// Trailing path snapshot, present when a new path sample was added.
    pub path: Option<TrailingPath>,
}

/// Re-anchors the incremental IMU-rate stream to the latest LiDAR pose.
#[derive(Debug)]
pub struct PoseFusion {
    lidar_frame: String,
    baselink_frame: String,
    odometry_frame: String,
    map_frame: String,
    lidar_to_baselink: Option<Pose3D>,
    path_interval_us: u64,
    path_window_us: u64,

    queue: VecDeque<ImuOdometry>,
    anchor: Option<(u64, Pose3D)>,
    path: VecDeque<PathSample>,
    last_path_t: Option<u64>,
    warned_missing_transform: bool,
}

impl PoseFusion {
    /// Create a fusion stage from the pipeline configuration.
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            lidar_frame: config.lidar_frame.clone(),
            baselink_frame: config.baselink_frame.clone(),
            odometry_frame: config.odometry_frame.clone(),
            map_frame: config.map_frame.clone(),
            lidar_to_baselink: config.lidar_to_baselink,
            path_interval_us: config.path_interval_us,
            path_window_us: config.path_window_us,
            queue: VecDeque::new(),
            anchor: None,
            path: VecDeque::new(),
            last_path_t: None,
            warned_missing_transform: false,
        }
    }

    /// Record the latest LiDAR pose as the anchor.
    pub fn on_lidar_pose(&mut self, correction: &LidarPose) {
        self.anchor = Some((correction.timestamp_us, correction.pose));
    }

    /// Ingest one incremental odometry message and publish the fused pose.
    ///
    /// Returns `None` until the first anchor arrives, or when the message
    /// predates the anchor.
    pub fn on_imu_odometry(&mut self, msg: ImuOdometry) -> Option<FusionOutput> {
        self.queue.push_back(msg);

        let (anchor_t, anchor_pose) = self.anchor?;

        // Drop entries up to the anchor time; the queue front then holds the
        // first pose after the anchor.
        while let Some(front) = self.queue.front() {
            if front.timestamp_us <= anchor_t {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        let front = self.queue.front()?;
        let back = *self.queue.back()?;

        let delta = front.pose.inverse().compose(&back.pose);
        let fused_pose = anchor_pose.compose(&delta);
        let timestamp_us = back.timestamp_us;

        let odometry = FusedOdometry {
            timestamp_us,
            pose: fused_pose,
            linear_velocity: back.linear_velocity,
            angular_velocity: back.angular_velocity,
        };

        let body_pose = self.to_body_frame(&fused_pose);
        let map_to_odom = FrameTransform {
            parent: self.map_frame.clone(),
            child: self.odometry_frame.clone(),
            timestamp_us,
            pose: Pose3D::identity(),
        };
        let odom_to_body = FrameTransform {
            parent: self.odometry_frame.clone(),
            child: self.baselink_frame.clone(),
            timestamp_us,
            pose: body_pose,
        };

        let path = self.update_path(timestamp_us, anchor_t, fused_pose);

        Some(FusionOutput {
            odometry,
            map_to_odom,
            odom_to_body,
            path,
        })
    }

    /// Apply the LiDAR-to-body transform when the frames differ.
    fn to_body_frame(&mut self, pose: &Pose3D) -> Pose3D {
        if self.lidar_frame == self.baselink_frame {
            return *pose;
        }
        match self.lidar_to_baselink {
            Some(transform) => pose.compose(&transform),
            None => {
                if !self.warned_missing_transform {
                    log::warn!(
                        "no {} -> {} transform configured, assuming identity",
                        self.lidar_frame,
                        self.baselink_frame
                    );
                    self.warned_missing_transform = true;
                }
                *pose
            }
        }
    }

    /// Append to the trailing path at the configured spacing and trim
    /// entries that fell behind the window.
    fn update_path(
        &mut self,
        timestamp_us: u64,
        anchor_t: u64,
        pose: Pose3D,
    ) -> Option<TrailingPath> {
        let due = self
            .last_path_t
            .map_or(true, |last| timestamp_us.saturating_sub(last) > self.path_interval_us);
        if !due {
            return None;
        }

        self.last_path_t = Some(timestamp_us);
        self.path.push_back(PathSample { timestamp_us, pose });

        let cutoff = anchor_t.saturating_sub(self.path_window_us);
        while let Some(front) = self.path.front() {
            if front.timestamp_us < cutoff {
                self.path.pop_front();
            } else {
                break;
            }
        }

        Some(TrailingPath {
            samples: self.path.iter().copied().collect(),
        })
    }

    /// Whether an anchor has been received.
    #[inline]
    pub fn has_anchor(&self) -> bool {
        self.anchor.is_some()
    }

    /// Number of queued incremental messages.
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
