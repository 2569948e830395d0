//! Caller-side reconnection helpers.
//!
//! A [`crate::WatchSession`] never reconnects on its own. Only the caller
//! knows the selectors and namespace the watch was opened with, so the
//! caller reissues the watch. These helpers cover the parts every caller
//! needs: remembering the last resource version seen ([`ResumeTracker`]),
//! deciding what to do after a session ends ([`Reconnect`]) and spacing out
//! attempts ([`FibonacciBackoff`]).

use crate::error::{DecodeError, WatchError};
use crate::event::{CloseReason, WatchEvent};
use kube::{Resource, ResourceExt};
use std::time::Duration;
use tracing::{debug, info};

/// What the caller should do after a session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconnect {
    /// Open a new watch starting at `resource_version`
    Resume {
        /// Last resource version observed
        resource_version: String,
    },
    /// Resume position unknown or expired: list first, then watch from the
    /// list's resource version
    Relist,
    /// Do not reconnect
    Stop,
}

/// Tracks the resume point of a watch across sessions
#[derive(Debug, Clone, Default)]
pub struct ResumeTracker {
    resource_version: Option<String>,
}

impl ResumeTracker {
    /// Start from a known resource version, e.g. from a preceding list call
    pub fn new(resource_version: Option<String>) -> Self {
        Self { resource_version }
    }

    /// Last resource version observed
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// Record the resource version carried by a dispatched event.
    ///
    /// Bookmarks count the same as real changes: they exist to hand out a
    /// fresher resume point.
    pub fn observe<K: Resource>(&mut self, event: &WatchEvent<K>) {
        if let Some(rv) = event.object.resource_version() {
            self.resource_version = Some(rv);
        }
    }

    /// Decide how to continue after a session closed without a fault
    pub fn on_closed(&mut self, reason: CloseReason) -> Reconnect {
        match reason {
            CloseReason::Cancelled => Reconnect::Stop,
            _ => self.resume_or_relist(),
        }
    }

    /// Decide how to continue after a session failed
    pub fn on_error(&mut self, error: &WatchError) -> Reconnect {
        match error {
            WatchError::Server(_) if error.is_expired() => {
                info!(
                    "Resource version {} expired, relist required",
                    self.resource_version.as_deref().unwrap_or("<none>")
                );
                self.resource_version = None;
                Reconnect::Relist
            }
            WatchError::Server(_) => Reconnect::Relist,
            WatchError::Transport(_) | WatchError::Decode(DecodeError::Truncated { .. }) => {
                self.resume_or_relist()
            }
            // Bad data will come back the same way on a new connection.
            WatchError::Decode(_) => Reconnect::Stop,
        }
    }

    fn resume_or_relist(&self) -> Reconnect {
        match &self.resource_version {
            Some(rv) => {
                debug!("Resuming watch from resource version {}", rv);
                Reconnect::Resume {
                    resource_version: rv.clone(),
                }
            }
            None => Reconnect::Relist,
        }
    }
}

/// Fibonacci backoff calculator for reconnect attempts
///
/// Produces `min, min, 2*min, 3*min, 5*min, ...` capped at `max`. The
/// sequence grows more slowly than exponential backoff, so a briefly
/// unavailable API server is retried reasonably soon.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    max: Duration,
    prev: Duration,
    current: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min` and never exceeding `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            prev: Duration::ZERO,
            current: min.min(max),
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Reset after a healthy session
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};

    fn config_map_event(kind: ChangeKind, rv: Option<&str>) -> WatchEvent<ConfigMap> {
        WatchEvent {
            kind,
            object: ConfigMap {
                metadata: ObjectMeta {
                    name: Some("settings".to_string()),
                    resource_version: rv.map(str::to_string),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    fn server_error(code: i32, reason: &str) -> WatchError {
        WatchError::Server(Box::new(Status {
            code: Some(code),
            reason: Some(reason.to_string()),
            ..Default::default()
        }))
    }

    #[test]
    fn test_tracks_latest_resource_version_including_bookmarks() {
        let mut tracker = ResumeTracker::default();
        tracker.observe(&config_map_event(ChangeKind::Added, Some("10")));
        tracker.observe(&config_map_event(ChangeKind::Bookmark, Some("15")));
        tracker.observe(&config_map_event(ChangeKind::Modified, None));

        assert_eq!(tracker.resource_version(), Some("15"));
    }

    #[test]
    fn test_end_of_stream_resumes() {
        let mut tracker = ResumeTracker::new(Some("7".to_string()));
        assert_eq!(
            tracker.on_closed(CloseReason::EndOfStream),
            Reconnect::Resume {
                resource_version: "7".to_string()
            }
        );
    }

    #[test]
    fn test_end_of_stream_without_position_relists() {
        let mut tracker = ResumeTracker::default();
        assert_eq!(tracker.on_closed(CloseReason::EndOfStream), Reconnect::Relist);
    }

    #[test]
    fn test_cancelled_stops() {
        let mut tracker = ResumeTracker::new(Some("7".to_string()));
        assert_eq!(tracker.on_closed(CloseReason::Cancelled), Reconnect::Stop);
    }

    #[test]
    fn test_expired_resource_version_clears_position() {
        let mut tracker = ResumeTracker::new(Some("7".to_string()));
        assert_eq!(
            tracker.on_error(&server_error(410, "Expired")),
            Reconnect::Relist
        );
        assert_eq!(tracker.resource_version(), None);
    }

    #[test]
    fn test_other_server_errors_relist_but_keep_position() {
        let mut tracker = ResumeTracker::new(Some("7".to_string()));
        assert_eq!(
            tracker.on_error(&server_error(500, "InternalError")),
            Reconnect::Relist
        );
        assert_eq!(tracker.resource_version(), Some("7"));
    }

    #[test]
    fn test_transport_fault_and_truncation_resume() {
        let mut tracker = ResumeTracker::new(Some("3".to_string()));
        let reset = WatchError::Transport(std::io::ErrorKind::ConnectionReset.into());
        let truncated = WatchError::Decode(DecodeError::Truncated {
            partial: "{\"ty".to_string(),
        });
        let expected = Reconnect::Resume {
            resource_version: "3".to_string(),
        };

        assert_eq!(tracker.on_error(&reset), expected);
        assert_eq!(tracker.on_error(&truncated), expected);
    }

    #[test]
    fn test_bad_payload_stops() {
        let mut tracker = ResumeTracker::new(Some("3".to_string()));
        let err = WatchError::Decode(DecodeError::UnknownType {
            kind: "SYNC".to_string(),
            line: String::new(),
        });
        assert_eq!(tracker.on_error(&err), Reconnect::Stop);
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        let seq: Vec<u64> = (0..8).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(2), Duration::from_secs(60));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_fibonacci_backoff_min_above_max_is_capped() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    }
}
