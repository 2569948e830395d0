//! Segment replay loop.
//!
//! Each input is one recorded watch response body. Segments are replayed in
//! order through a fresh [`WatchSession`], the way a controller would reopen
//! the watch after each disconnect: the resume point carries over, the
//! reconnect decision decides whether to go on, and faults are spaced out by
//! the backoff.

use crate::error::ReplayError;
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube_watch::{
    ChangeKind, CloseReason, FibonacciBackoff, Reconnect, ResumeTracker, WatchConfig, WatchError,
    WatchEvent, WatchHandler, WatchSession,
};
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a recorded segment is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Standard input (`-`)
    Stdin,
    /// A file containing one watch response body
    File(PathBuf),
}

impl Input {
    /// Parse a comma-separated list of inputs. An empty list means stdin.
    pub fn parse_list(raw: &str) -> Vec<Input> {
        let inputs: Vec<Input> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "-" => Input::Stdin,
                path => Input::File(PathBuf::from(path)),
            })
            .collect();

        if inputs.is_empty() {
            vec![Input::Stdin]
        } else {
            inputs
        }
    }

    async fn open(&self) -> Result<Box<dyn AsyncRead + Unpin + Send>, ReplayError> {
        match self {
            Input::Stdin => Ok(Box::new(tokio::io::stdin())),
            Input::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| ReplayError::Open {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Stdin => f.write_str("stdin"),
            Input::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Totals reported once the replay ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Segments replayed, including the one that stopped the replay
    pub segments: usize,
    /// Events dispatched across all segments
    pub events: u64,
    /// Resume point after the last segment
    pub resource_version: Option<String>,
}

/// Logs events and turns each session's ending into a reconnect decision
#[derive(Debug, Default)]
struct ReplayHandler {
    tracker: ResumeTracker,
    events: u64,
    decision: Option<Reconnect>,
}

impl WatchHandler<DynamicObject> for ReplayHandler {
    fn on_event(&mut self, kind: ChangeKind, object: DynamicObject) {
        let rv = object.resource_version().unwrap_or_default();
        if kind == ChangeKind::Bookmark {
            debug!("Bookmark at resource version {}", rv);
        } else {
            info!(
                "{} {}/{} (resource version {})",
                kind,
                object.namespace().unwrap_or_default(),
                object.name_any(),
                rv
            );
        }

        self.events += 1;
        self.tracker.observe(&WatchEvent { kind, object });
    }

    fn on_error(&mut self, error: WatchError) {
        if let Some(status) = error.status() {
            warn!(
                "Server ended the watch: {}",
                status.message.as_deref().unwrap_or("no message")
            );
        }
        self.decision = Some(self.tracker.on_error(&error));
    }

    fn on_closed(&mut self, reason: CloseReason) {
        self.decision = Some(self.tracker.on_closed(reason));
    }
}

/// Replays recorded segments one after another
#[derive(Debug)]
pub struct Replay {
    name: String,
    config: WatchConfig,
    cancel: CancellationToken,
    handler: ReplayHandler,
    backoff: FibonacciBackoff,
    segments: usize,
}

impl Replay {
    /// Create a replay labelled `name` in log lines
    pub fn new(name: impl Into<String>, config: WatchConfig, cancel: CancellationToken) -> Self {
        let backoff = FibonacciBackoff::new(config.backoff_min, config.backoff_max);
        Self {
            name: name.into(),
            config,
            cancel,
            handler: ReplayHandler::default(),
            backoff,
            segments: 0,
        }
    }

    /// Replay every input in order until one says stop
    pub async fn run(mut self, inputs: &[Input]) -> Result<ReplaySummary, ReplayError> {
        for input in inputs {
            if self.cancel.is_cancelled() {
                break;
            }
            let reader = input.open().await?;
            if !self.segment(&input.to_string(), reader).await? {
                break;
            }
        }
        Ok(self.summary())
    }

    /// Replay one segment. Returns whether the next segment should follow.
    pub async fn segment<R>(&mut self, label: &str, reader: R) -> Result<bool, ReplayError>
    where
        R: AsyncRead + Unpin,
    {
        let session: WatchSession<R, DynamicObject> =
            WatchSession::with_config(reader, self.cancel.clone(), &self.config)
                .named(format!("{}[{}]", self.name, label));
        let reason = session.run(&mut self.handler).await;
        self.segments += 1;

        match self.handler.decision.take().unwrap_or(Reconnect::Stop) {
            Reconnect::Stop if reason.is_failure() => Err(ReplayError::Unrecoverable {
                segment: label.to_string(),
                reason,
            }),
            Reconnect::Stop => {
                info!("{} replay stopping after {} ({})", self.name, label, reason);
                Ok(false)
            }
            Reconnect::Resume { resource_version } => {
                info!(
                    "{} replay resuming from resource version {}",
                    self.name, resource_version
                );
                Ok(self.pause_after(reason).await)
            }
            Reconnect::Relist => {
                info!(
                    "{} replay has no resume point, next segment starts a fresh list",
                    self.name
                );
                Ok(self.pause_after(reason).await)
            }
        }
    }

    /// Totals so far
    pub fn summary(&self) -> ReplaySummary {
        ReplaySummary {
            segments: self.segments,
            events: self.handler.events,
            resource_version: self.handler.tracker.resource_version().map(str::to_string),
        }
    }

    async fn pause_after(&mut self, reason: CloseReason) -> bool {
        if !reason.is_failure() {
            self.backoff.reset();
            return true;
        }

        let delay = self.backoff.next_backoff();
        warn!(
            "{} replay: segment ended with a {}, waiting {:?}",
            self.name, reason, delay
        );
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_watch::MockWatchStream;
    use std::time::Duration;

    fn config() -> WatchConfig {
        WatchConfig {
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..WatchConfig::default()
        }
    }

    fn pod(kind: &str, name: &str, rv: u32) -> String {
        format!(
            r#"{{"type":"{kind}","object":{{"apiVersion":"v1","kind":"Pod","metadata":{{"name":"{name}","namespace":"default","resourceVersion":"{rv}"}}}}}}"#
        )
    }

    #[test]
    fn test_parse_input_list() {
        assert_eq!(
            Input::parse_list("a.ndjson, -,b.ndjson,"),
            vec![
                Input::File(PathBuf::from("a.ndjson")),
                Input::Stdin,
                Input::File(PathBuf::from("b.ndjson")),
            ]
        );
        assert_eq!(Input::parse_list(""), vec![Input::Stdin]);
        assert_eq!(Input::Stdin.to_string(), "stdin");
    }

    #[tokio::test]
    async fn test_resume_point_carries_across_segments() {
        let mut replay = Replay::new("pods", config(), CancellationToken::new());

        let first = MockWatchStream::from_lines([pod("ADDED", "web", 5), pod("MODIFIED", "web", 7)]);
        assert!(replay.segment("first", first).await.unwrap());

        let second = MockWatchStream::builder()
            .line(pod("DELETED", "web", 9))
            .io_error(std::io::ErrorKind::ConnectionReset)
            .build();
        assert!(replay.segment("second", second).await.unwrap());

        assert_eq!(
            replay.summary(),
            ReplaySummary {
                segments: 2,
                events: 3,
                resource_version: Some("9".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_bad_payload_is_unrecoverable() {
        let mut replay = Replay::new("pods", config(), CancellationToken::new());
        let stream = MockWatchStream::from_lines([r#"{"type":"RESYNC","object":{}}"#]);

        let err = replay.segment("bad", stream).await.unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Unrecoverable {
                reason: CloseReason::DecodeFault,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_expired_resource_version_continues_with_relist() {
        let mut replay = Replay::new("pods", config(), CancellationToken::new());
        let stream = MockWatchStream::from_lines([
            pod("ADDED", "web", 5),
            r#"{"type":"ERROR","object":{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure","message":"too old resource version","reason":"Expired","code":410}}"#.to_string(),
        ]);

        assert!(replay.segment("expired", stream).await.unwrap());
        assert_eq!(replay.summary().resource_version, None);
    }

    #[tokio::test]
    async fn test_cancelled_replay_stops() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut replay = Replay::new("pods", config(), cancel);
        let stream = MockWatchStream::builder().hang().build();
        let probe = stream.probe();

        assert!(!replay.segment("idle", stream).await.unwrap());
        assert!(probe.is_released());
        assert_eq!(replay.summary().events, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let replay = Replay::new("pods", config(), CancellationToken::new());
        let inputs = [Input::File(PathBuf::from("/nonexistent/watch-segment.ndjson"))];

        let err = replay.run(&inputs).await.unwrap_err();
        assert!(matches!(err, ReplayError::Open { .. }));
    }
}
