//! Core value types shared by all layers.

mod imu;
mod odometry;
mod pose;
mod state;

pub use imu::ImuSample;
pub use odometry::{FrameTransform, FusedOdometry, ImuOdometry, LidarPose, PathSample, TrailingPath};
pub use pose::Pose3D;
pub use state::{ImuBias, NavState};
