//! Kubernetes Watch Stream Engine
//!
//! Consumes the body of a Kubernetes `?watch=true` response: newline-delimited
//! JSON envelopes describing ADDED/MODIFIED/DELETED/BOOKMARK/ERROR changes.
//! Opening the HTTP request (URL, query parameters, credentials) is left to
//! the caller; this crate starts from an already-open `AsyncRead`.
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::Pod;
//! use kube_watch::{ResumeTracker, WatchSession};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(body: impl tokio::io::AsyncRead + Unpin) -> Result<(), kube_watch::WatchError> {
//! let cancel = CancellationToken::new();
//! let mut session: WatchSession<_, Pod> = WatchSession::new(body, cancel.clone()).named("pods");
//! let mut resume = ResumeTracker::default();
//!
//! while let Some(event) = session.next().await {
//!     let event = event?;
//!     resume.observe(&event);
//!     println!("{} {:?}", event.kind, event.object.metadata.name);
//! }
//! // Reconnect with `resume.resource_version()` if the watch should continue.
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Frame decoding**: line reassembly, envelope validation, truncation detection
//! - **Pull and push sessions**: `next()` / `Stream`, or a `WatchHandler` on its own task
//! - **Cancellation**: a `CancellationToken` interrupts even an idle read
//! - **Reconnect helpers**: resume tracking and Fibonacci backoff for the caller's retry loop

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod reconnect;
pub mod session;

pub use config::WatchConfig;
pub use error::{ConfigError, DecodeError, WatchError};
pub use event::{ChangeKind, CloseReason, WatchEvent};
pub use frame::{Frame, FrameCodec, FrameDecoder};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockWatchStream;
pub use reconnect::{FibonacciBackoff, Reconnect, ResumeTracker};
pub use session::{Notification, WatchHandler, WatchSession};
