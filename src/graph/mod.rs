//! Factor-graph layer: factor types and the incremental smoother.

mod factors;
mod optimizer;

pub use factors::{diagonal_info6, isotropic_info3, isotropic_info6, Factor};
pub use optimizer::{IncrementalSmoother, KeyState, SmootherConfig, UpdateResult, UpdateStatus};
