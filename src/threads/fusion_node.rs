//! Fusion node: channel-wired estimator and fusion actors.
//!
//! Two worker threads serialize all handler work:
//! - "estimator" owns the `InertialEstimator` lock (estimator and propagator
//!   share one actor and therefore one lock), consuming raw IMU samples and
//!   LiDAR corrections, and emitting incremental odometry;
//! - "fusion" owns the `PoseFusion` lock, consuming incremental odometry and
//!   LiDAR anchors, and emitting fused output.
//!
//! Input channels are bounded; a full IMU channel drops the new sample
//! rather than blocking the producer, preserving per-queue timestamp
//! monotonicity. Output channels are bounded too, and ticks nobody drains
//! are dropped. Shutdown is cooperative: the stop flag is observed between
//! messages and in-flight work runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::FusionConfig;
use crate::core::types::{ImuOdometry, ImuSample, LidarPose};
use crate::estimator::InertialEstimator;
use crate::fusion::{FusionOutput, PoseFusion};
use crate::imu::ImuRectifier;

use super::{Error, Result};

/// Channel capacities for the node.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Raw IMU input and incremental odometry capacity.
    pub imu_capacity: usize,
    /// LiDAR correction input capacity.
    pub pose_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            imu_capacity: 2000,
            pose_capacity: 16,
        }
    }
}

/// Handle to the running fusion pipeline.
pub struct FusionNode {
    estimator: Arc<Mutex<InertialEstimator>>,
    fusion: Arc<Mutex<PoseFusion>>,
    imu_tx: Sender<ImuSample>,
    lidar_estimator_tx: Sender<LidarPose>,
    lidar_fusion_tx: Sender<LidarPose>,
    incremental_rx: Receiver<ImuOdometry>,
    fused_rx: Receiver<FusionOutput>,
    running: Arc<AtomicBool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl FusionNode {
    /// Spawn the estimator and fusion threads with default channel sizes.
    pub fn spawn(config: FusionConfig) -> Result<Self> {
        Self::spawn_with(config, ChannelConfig::default())
    }

    /// Spawn the estimator and fusion threads.
    pub fn spawn_with(config: FusionConfig, channels: ChannelConfig) -> Result<Self> {
        let estimator = Arc::new(Mutex::new(InertialEstimator::new(&config)));
        let fusion = Arc::new(Mutex::new(PoseFusion::new(&config)));
        let rectifier = ImuRectifier::new(config.sensor_rotation);
        let running = Arc::new(AtomicBool::new(true));

        let (imu_tx, imu_rx) = bounded::<ImuSample>(channels.imu_capacity);
        let (lidar_estimator_tx, lidar_estimator_rx) = bounded::<LidarPose>(channels.pose_capacity);
        let (lidar_fusion_tx, lidar_fusion_rx) = bounded::<LidarPose>(channels.pose_capacity);
        // Estimator output tees into the fusion stage and the public stream.
        let (incremental_internal_tx, incremental_internal_rx) =
            bounded::<ImuOdometry>(channels.imu_capacity);
        let (incremental_tx, incremental_rx) = bounded::<ImuOdometry>(channels.imu_capacity);
        let (fused_tx, fused_rx) = bounded::<FusionOutput>(channels.imu_capacity);

        let mut handles = Vec::with_capacity(2);

        let estimator_handle = {
            let estimator = Arc::clone(&estimator);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("estimator".into())
                .spawn(move || {
                    run_estimator_loop(
                        estimator,
                        rectifier,
                        imu_rx,
                        lidar_estimator_rx,
                        incremental_internal_tx,
                        incremental_tx,
                        running,
                    );
                })
                .map_err(|source| Error::Spawn {
                    name: "estimator",
                    source,
                })?
        };
        handles.push(("estimator", estimator_handle));

        let fusion_handle = {
            let fusion = Arc::clone(&fusion);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("fusion".into())
                .spawn(move || {
                    run_fusion_loop(
                        fusion,
                        incremental_internal_rx,
                        lidar_fusion_rx,
                        fused_tx,
                        running,
                    );
                })
                .map_err(|source| Error::Spawn {
                    name: "fusion",
                    source,
                })?
        };
        handles.push(("fusion", fusion_handle));

        Ok(Self {
            estimator,
            fusion,
            imu_tx,
            lidar_estimator_tx,
            lidar_fusion_tx,
            incremental_rx,
            fused_rx,
            running,
            handles,
        })
    }

    /// Feed a raw IMU sample. Returns false when the input channel is full
    /// and the sample was dropped.
    pub fn send_imu(&self, sample: ImuSample) -> bool {
        let ok = self.imu_tx.try_send(sample).is_ok();
        if !ok {
            log::debug!("imu channel full, dropping sample at {} us", sample.timestamp_us);
        }
        ok
    }

    /// Feed a LiDAR pose correction to both the estimator and the fusion
    /// anchor. Returns false when either channel dropped it.
    pub fn send_lidar_pose(&self, correction: LidarPose) -> bool {
        let a = self.lidar_estimator_tx.try_send(correction).is_ok();
        let b = self.lidar_fusion_tx.try_send(correction).is_ok();
        if !(a && b) {
            log::debug!(
                "lidar channel full, dropping correction at {} us",
                correction.timestamp_us
            );
        }
        a && b
    }

    /// Receiver for the incremental IMU-rate odometry stream.
    pub fn incremental_odometry(&self) -> Receiver<ImuOdometry> {
        self.incremental_rx.clone()
    }

    /// Receiver for the fused output stream.
    pub fn fused_output(&self) -> Receiver<FusionOutput> {
        self.fused_rx.clone()
    }

    /// Shared handle to the estimator actor, for status snapshots.
    pub fn estimator(&self) -> Arc<Mutex<InertialEstimator>> {
        Arc::clone(&self.estimator)
    }

    /// Shared handle to the fusion actor, for status snapshots.
    pub fn pose_fusion(&self) -> Arc<Mutex<PoseFusion>> {
        Arc::clone(&self.fusion)
    }

    /// Stop both threads and wait for them to finish their in-flight work.
    pub fn shutdown(self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        drop(self.imu_tx);
        drop(self.lidar_estimator_tx);
        drop(self.lidar_fusion_tx);

        for (name, handle) in self.handles {
            handle.join().map_err(|_| Error::ThreadPanic(name))?;
        }
        Ok(())
    }
}

fn run_estimator_loop(
    estimator: Arc<Mutex<InertialEstimator>>,
    rectifier: ImuRectifier,
    imu_rx: Receiver<ImuSample>,
    lidar_rx: Receiver<LidarPose>,
    incremental_internal_tx: Sender<ImuOdometry>,
    incremental_tx: Sender<ImuOdometry>,
    running: Arc<AtomicBool>,
) {
    log::info!("estimator thread starting");

    loop {
        select! {
            recv(imu_rx) -> msg => match msg {
                Ok(raw) => {
                    let sample = rectifier.rectify(&raw);
                    let odom = estimator.lock().on_imu(sample);
                    if let Some(odom) = odom {
                        if incremental_internal_tx.try_send(odom).is_err() {
                            log::debug!("fusion stage behind, dropping incremental odometry");
                        }
                        let _ = incremental_tx.try_send(odom);
                    }
                }
                Err(_) => break,
            },
            recv(lidar_rx) -> msg => match msg {
                Ok(correction) => {
                    estimator.lock().on_lidar_pose(&correction);
                }
                Err(_) => break,
            },
            default(Duration::from_millis(100)) => {}
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    log::info!("estimator thread stopped");
}

fn run_fusion_loop(
    fusion: Arc<Mutex<PoseFusion>>,
    incremental_rx: Receiver<ImuOdometry>,
    lidar_rx: Receiver<LidarPose>,
    fused_tx: Sender<FusionOutput>,
    running: Arc<AtomicBool>,
) {
    log::info!("fusion thread starting");

    loop {
        select! {
            recv(incremental_rx) -> msg => match msg {
                Ok(odom) => {
                    let output = fusion.lock().on_imu_odometry(odom);
                    if let Some(output) = output {
                        if fused_tx.try_send(output).is_err() {
                            log::debug!("fused output not drained, dropping tick");
                        }
                    }
                }
                Err(_) => break,
            },
            recv(lidar_rx) -> msg => match msg {
                Ok(correction) => {
                    fusion.lock().on_lidar_pose(&correction);
                }
                Err(_) => break,
            },
            default(Duration::from_millis(100)) => {}
        }

        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    log::info!("fusion thread stopped");
}
