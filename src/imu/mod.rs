//! Inertial measurement processing: noise models, preintegration, and
//! sensor rectification.

mod noise;
mod preintegration;
mod rectify;

pub use noise::{ImuNoiseParams, PreintegrationParams, INTEGRATION_SIGMA};
pub use preintegration::{CorrectedDelta, PreintegratedImu};
pub use rectify::ImuRectifier;
