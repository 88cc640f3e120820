//! GatiOdometry - IMU-LiDAR odometry fusion core
//!
//! Fuses low-rate LiDAR pose corrections with high-rate inertial
//! measurements into an IMU-rate 6-DOF odometry stream:
//!
//! - **Estimator**: incremental factor-graph smoothing over pose, velocity,
//!   and IMU bias, one optimization per LiDAR correction, with periodic
//!   graph reseeding
//! - **Propagator**: forward preintegration from the latest optimized state,
//!   one pose per IMU sample
//! - **Fusion**: LiDAR-anchored re-publication of the incremental stream
//!   with a trailing path
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    threads/                         │  ← Actor wiring
//! │              (fusion_node, channels)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │              estimator/    fusion/                  │  ← Components
//! │      (graph cycle, propagator, pose fusion)         │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     graph/                          │  ← Optimization
//! │          (factors, incremental smoother)            │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      imu/                           │  ← Inertial math
//! │        (preintegration, noise, rectification)       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! The IMU stream fans out to the estimator's optimization queue and the
//! propagator. The LiDAR pose stream fans out to the estimator (as a
//! correction factor) and to the fusion stage (as the anchor). After every
//! correction the estimator publishes its optimized state to the
//! propagator, whose incremental output feeds the fusion stage.
//!
//! # Usage
//!
//! ```no_run
//! use gati_odometry::{FusionConfig, FusionNode};
//!
//! let node = FusionNode::spawn(FusionConfig::default()).expect("spawn workers");
//! let fused = node.fused_output();
//! // feed node.send_imu(..) / node.send_lidar_pose(..) from the drivers,
//! // consume fused odometry from the receiver.
//! # drop(fused);
//! ```

// Layer 1: Core foundation (no internal deps)
pub mod core;

// Layer 2: Inertial measurement processing (depends on core)
pub mod imu;

// Layer 3: Factor-graph optimization (depends on core, imu)
pub mod graph;

// Layer 4: Fusion components (depends on core, imu, graph)
pub mod estimator;
pub mod fusion;

// Layer 5: Thread infrastructure (depends on all layers)
pub mod threads;

// Configuration shared by all layers
pub mod config;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use core::math;
pub use core::types::{
    FrameTransform, FusedOdometry, ImuBias, ImuOdometry, ImuSample, LidarPose, NavState,
    PathSample, Pose3D, TrailingPath,
};

// Inertial processing
pub use imu::{ImuNoiseParams, ImuRectifier, PreintegratedImu, PreintegrationParams};

// Factor graph
pub use graph::{
    Factor, IncrementalSmoother, KeyState, SmootherConfig, UpdateResult, UpdateStatus,
};

// Components
pub use estimator::{CorrectionResult, ImuPropagator, InertialEstimator};
pub use fusion::{FusionOutput, PoseFusion};

// Node wiring
pub use config::FusionConfig;
pub use threads::{ChannelConfig, FusionNode};
