//! Event frame decoder.
//!
//! Splits a newline-delimited JSON watch stream into [`Frame`]s. Each line is
//! an envelope `{"type": "...", "object": {...}}`; the decoder validates the
//! envelope and hands back the `object` bytes untouched, so it never needs to
//! know the target resource type.
//!
//! End of input with nothing buffered is a clean end of stream. End of input
//! in the middle of a line is [`DecodeError::Truncated`].

use crate::error::{DecodeError, WatchError};
use crate::event::ChangeKind;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::borrow::Cow;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::trace;

/// Default upper bound for a single line on the wire
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One decoded wire record: a change kind plus the raw `object` JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Envelope `type`
    pub kind: ChangeKind,
    /// Complete, unparsed JSON of the envelope `object`
    pub object: Bytes,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
    #[serde(borrow)]
    object: &'a RawValue,
}

/// Newline-delimited JSON codec producing [`Frame`]s
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    // Bytes of the buffer already scanned for a newline
    scanned: usize,
}

impl FrameCodec {
    /// Create a codec rejecting lines longer than `max_frame_bytes`
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            scanned: 0,
        }
    }

    /// Configured line limit
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WatchError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WatchError> {
        loop {
            let start = self.scanned.min(buf.len());
            let Some(offset) = buf[start..].iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_frame_bytes {
                    return Err(DecodeError::FrameTooLong {
                        limit: self.max_frame_bytes,
                    }
                    .into());
                }
                self.scanned = buf.len();
                return Ok(None);
            };

            let line = buf.split_to(start + offset + 1);
            self.scanned = 0;

            let line = line[..line.len() - 1].trim_ascii();
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_frame_bytes {
                return Err(DecodeError::FrameTooLong {
                    limit: self.max_frame_bytes,
                }
                .into());
            }
            return parse_line(line).map(Some);
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WatchError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        let pending = buf.split();
        self.scanned = 0;
        if pending.trim_ascii().is_empty() {
            return Ok(None);
        }
        Err(DecodeError::Truncated {
            partial: String::from_utf8_lossy(&pending).into_owned(),
        }
        .into())
    }
}

/// Parse one complete, trimmed line into a frame.
pub fn parse_line(line: &[u8]) -> Result<Frame, WatchError> {
    let envelope: Envelope<'_> =
        serde_json::from_slice(line).map_err(|source| DecodeError::Malformed {
            line: String::from_utf8_lossy(line).into_owned(),
            source,
        })?;

    let kind = ChangeKind::from_wire(&envelope.kind).ok_or_else(|| DecodeError::UnknownType {
        kind: envelope.kind.to_string(),
        line: String::from_utf8_lossy(line).into_owned(),
    })?;

    trace!("Decoded {} frame ({} bytes)", kind, line.len());
    Ok(Frame {
        kind,
        object: Bytes::copy_from_slice(envelope.object.get().as_bytes()),
    })
}

/// Pulls frames off a byte stream one at a time.
///
/// The decoder reads only; releasing the stream is up to whoever owns the
/// decoder (see [`FrameDecoder::into_inner`]).
#[derive(Debug)]
pub struct FrameDecoder<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    /// Wrap `reader` with the default frame limit
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, FrameCodec::default())
    }

    /// Wrap `reader` with an explicit codec
    pub fn with_codec(reader: R, codec: FrameCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    /// Next frame, `Ok(None)` on clean end of stream.
    ///
    /// Cancel safe: dropping the returned future before it completes loses
    /// no buffered data.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, WatchError> {
        self.inner.next().await.transpose()
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
