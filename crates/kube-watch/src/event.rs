//! Watch event types.
//!
//! `ChangeKind` tags every frame read off the wire, `WatchEvent` is what a
//! session hands to its caller, and `CloseReason` records how a session ended.

use std::fmt;

/// Kind of change carried by a watch frame.
///
/// `Error` never reaches a caller as an event: an ERROR frame terminates the
/// session and is surfaced as [`crate::WatchError::Server`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Object was created
    Added,
    /// Object was updated
    Modified,
    /// Object was removed; the payload is its last known state
    Deleted,
    /// Progress marker carrying only a fresher resource version
    Bookmark,
    /// Server-side error; the payload is a `Status`
    Error,
}

impl ChangeKind {
    /// Parse the envelope's `type` field.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "ADDED" => Some(ChangeKind::Added),
            "MODIFIED" => Some(ChangeKind::Modified),
            "DELETED" => Some(ChangeKind::Deleted),
            "BOOKMARK" => Some(ChangeKind::Bookmark),
            "ERROR" => Some(ChangeKind::Error),
            _ => None,
        }
    }

    /// Wire spelling of this kind
    pub fn as_wire(self) -> &'static str {
        match self {
            ChangeKind::Added => "ADDED",
            ChangeKind::Modified => "MODIFIED",
            ChangeKind::Deleted => "DELETED",
            ChangeKind::Bookmark => "BOOKMARK",
            ChangeKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A typed event dispatched by a watch session
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent<K> {
    /// What happened
    pub kind: ChangeKind,
    /// Object snapshot at the time of the event
    pub object: K,
}

impl<K> WatchEvent<K> {
    /// Whether this event is a bookmark rather than a real change
    pub fn is_bookmark(&self) -> bool {
        self.kind == ChangeKind::Bookmark
    }
}

/// Why a watch session reached its closed state.
///
/// Exactly one reason is recorded per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Server closed the stream cleanly, typically after `timeoutSeconds`
    EndOfStream,
    /// Caller cancelled the session
    Cancelled,
    /// Reading the stream failed
    TransportFault,
    /// Wire data or a payload could not be decoded
    DecodeFault,
    /// Server sent an ERROR event
    ServerError,
}

impl CloseReason {
    /// `EndOfStream` and `Cancelled` are normal outcomes; the rest are faults.
    pub fn is_failure(self) -> bool {
        !matches!(self, CloseReason::EndOfStream | CloseReason::Cancelled)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::EndOfStream => "end of stream",
            CloseReason::Cancelled => "cancelled",
            CloseReason::TransportFault => "transport fault",
            CloseReason::DecodeFault => "decode fault",
            CloseReason::ServerError => "server error",
        };
        f.write_str(reason)
    }
}
