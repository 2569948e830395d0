//! Replay-specific error types.

use kube_watch::{CloseReason, ConfigError};
use thiserror::Error;

/// Errors that end a replay early
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A recorded segment could not be opened
    #[error("Failed to open segment {path}: {source}")]
    Open {
        /// Path as given in `WATCH_INPUT`
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A segment failed in a way reconnecting cannot fix
    #[error("Segment {segment} ended with a {reason}, not continuing")]
    Unrecoverable {
        /// Segment label
        segment: String,
        /// How the segment's session closed
        reason: CloseReason,
    },
}
