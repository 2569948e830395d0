//! Scripted watch stream for unit testing
//!
//! `MockWatchStream` replays a fixed sequence of chunks and I/O errors
//! through `AsyncRead`, so sessions can be driven without an API server.
//! It records when it is dropped, which lets tests check that a session
//! released its stream on every exit path.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug)]
enum Step {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

/// What the stream does once the script is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Report end of stream
    Eof,
    /// Never produce another byte; models an idle watch
    Hang,
}

/// Observes a `MockWatchStream` after it has been moved into a session
#[derive(Debug, Clone)]
pub struct StreamProbe {
    released: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl StreamProbe {
    /// Whether the stream has been dropped
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of `poll_read` calls the stream has served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Builder for `MockWatchStream`
#[derive(Debug, Default)]
pub struct MockWatchStreamBuilder {
    steps: VecDeque<Step>,
    hang: bool,
}

impl MockWatchStreamBuilder {
    /// Append a raw chunk
    pub fn chunk(mut self, data: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Data(data.as_ref().to_vec()));
        self
    }

    /// Append one line, adding the trailing newline
    pub fn line(mut self, line: impl AsRef<str>) -> Self {
        let mut data = line.as_ref().as_bytes().to_vec();
        data.push(b'\n');
        self.steps.push_back(Step::Data(data));
        self
    }

    /// Append a read failure
    pub fn io_error(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Error(kind));
        self
    }

    /// Stay pending forever once the script runs out instead of ending
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Build the stream
    pub fn build(self) -> MockWatchStream {
        MockWatchStream {
            steps: self.steps,
            after: if self.hang { AfterScript::Hang } else { AfterScript::Eof },
            released: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// In-memory `AsyncRead` replaying a script of chunks and errors
#[derive(Debug)]
pub struct MockWatchStream {
    steps: VecDeque<Step>,
    after: AfterScript,
    released: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl MockWatchStream {
    /// Start scripting a stream
    pub fn builder() -> MockWatchStreamBuilder {
        MockWatchStreamBuilder::default()
    }

    /// Stream emitting `lines`, each newline-terminated, then EOF
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        lines
            .into_iter()
            .fold(Self::builder(), |builder, line| builder.line(line))
            .build()
    }

    /// Handle for checking the stream after it has been handed off
    pub fn probe(&self) -> StreamProbe {
        StreamProbe {
            released: Arc::clone(&self.released),
            reads: Arc::clone(&self.reads),
        }
    }
}

impl AsyncRead for MockWatchStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        match self.steps.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.remaining());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.steps.push_front(Step::Data(rest));
                }
                Poll::Ready(Ok(()))
            }
            Some(Step::Error(kind)) => Poll::Ready(Err(io::Error::new(kind, "scripted failure"))),
            None => match self.after {
                AfterScript::Eof => Poll::Ready(Ok(())),
                // Nothing will ever wake this task; only cancellation can end the wait.
                AfterScript::Hang => Poll::Pending,
            },
        }
    }
}

impl Drop for MockWatchStream {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
