//! Thread infrastructure wiring the actors together.

mod fusion_node;

pub use fusion_node::{ChannelConfig, FusionNode};

use thiserror::Error as ThisError;

/// Errors from the thread plumbing. Estimation faults never surface here;
/// they are handled inside the actors.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A worker thread panicked before joining.
    #[error("{0} thread panicked")]
    ThreadPanic(&'static str),
}

/// Result alias for node operations.
pub type Result<T> = std::result::Result<T, Error>;
