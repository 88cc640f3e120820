//! Sensor-to-IMU measurement rectification.

use nalgebra::UnitQuaternion;

use crate::core::types::ImuSample;

/// Rotates raw IMU measurements from the physical sensor frame into the
/// IMU body frame used by the estimator.
///
/// The rectification is a pure rotation supplied by configuration; it is
/// applied to the acceleration and angular-rate vectors, and composed onto
/// the device orientation when one is present.
#[derive(Debug, Clone, Copy)]
pub struct ImuRectifier {
    rotation: UnitQuaternion<f64>,
}

impl ImuRectifier {
    /// Create a rectifier with the given sensor-to-IMU rotation.
    pub fn new(rotation: UnitQuaternion<f64>) -> Self {
        Self { rotation }
    }

    /// Identity rectification (sensor frame already matches the IMU frame).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Rotate a raw sample into the IMU frame.
    pub fn rectify(&self, sample: &ImuSample) -> ImuSample {
        ImuSample {
            timestamp_us: sample.timestamp_us,
            accel: self.rotation * sample.accel,
            gyro: self.rotation * sample.gyro,
            orientation: sample.orientation.map(|q| q * self.rotation.inverse()),
        }
    }
}

impl Default for ImuRectifier {
    fn default() -> Self {
        Self::identity()
    }
}
