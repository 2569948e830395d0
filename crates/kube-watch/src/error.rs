//! Watch stream errors

use crate::event::{ChangeKind, CloseReason};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use thiserror::Error;

/// Malformed, truncated or mistyped data on the watch stream.
///
/// Every variant is terminal for the session that produced it.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A complete line that is not a valid `{type, object}` envelope
    #[error("Malformed watch frame: {source} - line: {line}")]
    Malformed {
        /// The offending line, lossily decoded
        line: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Envelope carried a `type` outside ADDED/MODIFIED/DELETED/BOOKMARK/ERROR
    #[error("Unrecognized watch event type {kind:?} - line: {line}")]
    UnknownType {
        /// The `type` value as sent by the server
        kind: String,
        /// The offending line, lossily decoded
        line: String,
    },

    /// The stream ended in the middle of a record
    #[error("Watch stream truncated mid-record ({} bytes pending)", .partial.len())]
    Truncated {
        /// Bytes received after the last complete line, lossily decoded
        partial: String,
    },

    /// A single line grew past the configured frame limit
    #[error("Watch frame exceeds {limit} bytes")]
    FrameTooLong {
        /// Configured `max_frame_bytes`
        limit: usize,
    },

    /// Payload does not match the target resource type
    #[error("Failed to decode {kind} object: {source}")]
    Object {
        /// Kind of the frame whose payload failed
        kind: ChangeKind,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// ERROR payload is not a `meta/v1 Status`
    #[error("Failed to decode ERROR status payload: {source}")]
    Status {
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Terminal faults reported by a watch session
#[derive(Debug, Error)]
pub enum WatchError {
    /// Wire data or payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Reading from the underlying stream failed
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The server sent an explicit ERROR event
    #[error("Server error: {}", describe_status(.0))]
    Server(Box<Status>),
}

impl WatchError {
    /// Termination reason this fault maps to
    pub fn close_reason(&self) -> CloseReason {
        match self {
            WatchError::Decode(_) => CloseReason::DecodeFault,
            WatchError::Transport(_) => CloseReason::TransportFault,
            WatchError::Server(_) => CloseReason::ServerError,
        }
    }

    /// Server status payload, if the server terminated the watch
    pub fn status(&self) -> Option<&Status> {
        match self {
            WatchError::Server(status) => Some(status),
            _ => None,
        }
    }

    /// Whether the server rejected the requested resource version as too old.
    ///
    /// The caller has to relist before watching again; resuming from the
    /// same resource version will fail the same way.
    pub fn is_expired(&self) -> bool {
        self.status().is_some_and(|status| {
            status.code == Some(410)
                || matches!(status.reason.as_deref(), Some("Expired" | "Gone"))
        })
    }
}

fn describe_status(status: &Status) -> String {
    format!(
        "{} (reason: {}, code: {})",
        status.message.as_deref().unwrap_or("no message"),
        status.reason.as_deref().unwrap_or("unknown"),
        status
            .code
            .map_or_else(|| "none".to_string(), |code| code.to_string()),
    )
}

/// Invalid watch configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}
