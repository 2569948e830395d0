//! Watch session.
//!
//! A [`WatchSession`] owns one watch stream and turns its frames into typed
//! events. It can be consumed two ways:
//!
//! - **pull**: call [`WatchSession::next`] (or use [`WatchSession::into_stream`])
//!   until it returns `None`. A fault is yielded once as the last `Some(Err(_))`.
//! - **push**: hand a [`WatchHandler`] to [`WatchSession::run`] or
//!   [`WatchSession::spawn`]. The handler sees zero or more `on_event` calls
//!   followed by exactly one of `on_error` / `on_closed`.
//!
//! Either way the session never retries and never reorders. Once closed it
//! drops the stream and stays closed; reconnecting means opening a new stream
//! and building a new session (see [`crate::reconnect`]).

use crate::config::WatchConfig;
use crate::error::{DecodeError, WatchError};
use crate::event::{ChangeKind, CloseReason, WatchEvent};
use crate::frame::{Frame, FrameCodec, FrameDecoder};
use futures::Stream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives the outcome of a push-style session.
///
/// Calls happen on the task driving the session, in arrival order. After
/// `on_error` or `on_closed` the handler is never called again.
pub trait WatchHandler<K>: Send {
    /// A frame was decoded into `object`
    fn on_event(&mut self, kind: ChangeKind, object: K);

    /// The session ended with a fault
    fn on_error(&mut self, error: WatchError);

    /// The session ended normally: `EndOfStream` or `Cancelled`
    fn on_closed(&mut self, reason: CloseReason);
}

/// Everything a push-style session reports, as one value
#[derive(Debug)]
pub enum Notification<K> {
    /// Dispatched event
    Event(WatchEvent<K>),
    /// Terminal fault
    Error(WatchError),
    /// Normal termination
    Closed(CloseReason),
}

impl<K: Send> WatchHandler<K> for UnboundedSender<Notification<K>> {
    fn on_event(&mut self, kind: ChangeKind, object: K) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(Notification::Event(WatchEvent { kind, object }));
    }

    fn on_error(&mut self, error: WatchError) {
        let _ = self.send(Notification::Error(error));
    }

    fn on_closed(&mut self, reason: CloseReason) {
        let _ = self.send(Notification::Closed(reason));
    }
}

/// Decode an ERROR payload as a `Status`.
///
/// Servers label the payload `v1` or `meta.k8s.io/v1` depending on the
/// endpoint. The fields are identical, so the type markers are dropped before
/// decoding.
fn decode_status(payload: &[u8]) -> Result<Status, DecodeError> {
    let mut value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|source| DecodeError::Status { source })?;
    if let Some(map) = value.as_object_mut() {
        map.remove("apiVersion");
        map.remove("kind");
    }
    serde_json::from_value(value).map_err(|source| DecodeError::Status { source })
}

enum Step {
    Cancelled,
    Frame(Option<Result<Frame, WatchError>>),
}

/// Decodes one watch stream into events of type `K`
#[derive(Debug)]
pub struct WatchSession<R, K> {
    name: String,
    decoder: Option<FrameDecoder<R>>,
    cancel: CancellationToken,
    closed: Option<CloseReason>,
    dispatched: u64,
    _target: PhantomData<fn() -> K>,
}

impl<R, K> WatchSession<R, K>
where
    R: AsyncRead + Unpin,
    K: DeserializeOwned,
{
    /// Start a session over `reader` with default settings.
    ///
    /// `reader` must already be positioned at the start of the watch
    /// response body. The session takes exclusive ownership of it.
    pub fn new(reader: R, cancel: CancellationToken) -> Self {
        Self::with_config(reader, cancel, &WatchConfig::default())
    }

    /// Start a session over `reader` with explicit settings
    pub fn with_config(reader: R, cancel: CancellationToken, config: &WatchConfig) -> Self {
        Self {
            name: "unnamed".to_string(),
            decoder: Some(FrameDecoder::with_codec(
                reader,
                FrameCodec::new(config.max_frame_bytes),
            )),
            cancel,
            closed: None,
            dispatched: 0,
            _target: PhantomData,
        }
    }

    /// Label used in log lines, e.g. the resource kind being watched
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Session label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of events dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Why the session closed, `None` while it is open
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    /// Whether the session has reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Cancellation token observed by this session
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for the next event.
    ///
    /// Returns `Some(Ok(event))` for each dispatched event, `Some(Err(_))`
    /// once if the session fails, and `None` once closed (immediately on a
    /// clean end of stream or cancellation, and on every call afterwards).
    pub async fn next(&mut self) -> Option<Result<WatchEvent<K>, WatchError>> {
        let decoder = self.decoder.as_mut()?;

        let step = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Step::Cancelled,
            frame = decoder.next_frame() => Step::Frame(frame.transpose()),
        };

        match step {
            Step::Cancelled => {
                self.close(CloseReason::Cancelled);
                None
            }
            Step::Frame(None) => {
                self.close(CloseReason::EndOfStream);
                None
            }
            Step::Frame(Some(Err(error))) => Some(Err(self.fail(error))),
            Step::Frame(Some(Ok(frame))) => match self.dispatch(frame) {
                Ok(event) => Some(Ok(event)),
                Err(error) => Some(Err(self.fail(error))),
            },
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<WatchEvent<K>, WatchError> {
        if frame.kind == ChangeKind::Error {
            let status = decode_status(&frame.object)?;
            return Err(WatchError::Server(Box::new(status)));
        }

        let object: K = serde_json::from_slice(&frame.object).map_err(|source| {
            DecodeError::Object {
                kind: frame.kind,
                source,
            }
        })?;

        self.dispatched += 1;
        debug!(
            "{} watch: dispatching {} event #{}",
            self.name, frame.kind, self.dispatched
        );
        Ok(WatchEvent {
            kind: frame.kind,
            object,
        })
    }

    fn fail(&mut self, error: WatchError) -> WatchError {
        warn!("{} watch failed: {}", self.name, error);
        self.close(error.close_reason());
        error
    }

    fn close(&mut self, reason: CloseReason) {
        if self.closed.is_some() {
            return;
        }
        // Dropping the decoder releases the stream.
        self.decoder = None;
        self.closed = Some(reason);
        if !reason.is_failure() {
            info!(
                "{} watch closed ({}) after {} events",
                self.name, reason, self.dispatched
            );
        }
    }

    /// Drive the session to completion, reporting to `handler`.
    ///
    /// Returns the close reason that was reported. A session already closed
    /// through [`WatchSession::next`] has reported its end there, so the
    /// handler is not called and the stored reason is returned.
    pub async fn run<H>(mut self, handler: &mut H) -> CloseReason
    where
        H: WatchHandler<K> + ?Sized,
    {
        if let Some(reason) = self.closed {
            debug!("{} watch already closed ({})", self.name, reason);
            return reason;
        }
        loop {
            match self.next().await {
                Some(Ok(event)) => handler.on_event(event.kind, event.object),
                Some(Err(error)) => {
                    let reason = error.close_reason();
                    handler.on_error(error);
                    return reason;
                }
                None => {
                    let reason = self.closed.unwrap_or(CloseReason::EndOfStream);
                    handler.on_closed(reason);
                    return reason;
                }
            }
        }
    }

    /// Consume the session as a `Stream` of events.
    ///
    /// The stream ends after the terminal item; use [`WatchSession::next`]
    /// directly when the close reason is needed.
    pub fn into_stream(self) -> impl Stream<Item = Result<WatchEvent<K>, WatchError>> {
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next().await?;
            Some((item, session))
        })
    }
}

impl<R, K> WatchSession<R, K>
where
    R: AsyncRead + Unpin + Send + 'static,
    K: DeserializeOwned + Send + 'static,
{
    /// Run the session on its own task.
    ///
    /// The caller's task is never blocked; `handler` is moved to the worker
    /// and every callback runs there. The join handle yields the reported
    /// close reason. If a callback panics the task unwinds, the stream is
    /// still dropped, and the join handle reports the panic.
    pub fn spawn<H>(self, mut handler: H) -> JoinHandle<CloseReason>
    where
        H: WatchHandler<K> + 'static,
    {
        info!("Starting {} watch session", self.name);
        tokio::spawn(async move { self.run(&mut handler).await })
    }
}
