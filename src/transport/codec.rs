//! Line codec for chunked `data: <json>` response streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized line from a misbehaving backend cannot exhaust
//! memory. Each decoded line is classified as a data payload, the `[DONE]`
//! sentinel, or ignorable framing (blank lines, comments, `event:`/`id:`
//! fields).
//!
//! Chunk boundaries are arbitrary: a payload split across two network reads
//! is buffered until its newline arrives.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::trace;

use crate::{AppError, Result};

/// Maximum line length accepted by the codec: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Terminal sentinel carried as a data payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One meaningful item of a chunked event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// A JSON frame payload.
    Data(String),
    /// The `[DONE]` sentinel; the stream is complete.
    Done,
}

/// Decoder for `data: <json>` event streams.
#[derive(Debug)]
pub struct EventStreamCodec(LinesCodec);

impl EventStreamCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for EventStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventStreamCodec {
    type Item = StreamLine;
    type Error = AppError;

    /// Decode the next meaningful line from `src`, skipping framing lines.
    ///
    /// Returns `Ok(None)` when `src` holds no complete meaningful line yet.
    /// Returns `Err(AppError::Decode("line too long: …"))` when a line
    /// exceeds [`MAX_LINE_BYTES`]; the oversized line is discarded and the
    /// next call resumes after it.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(line) = self.0.decode(src).map_err(map_codec_error)? {
            if let Some(item) = classify(&line) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Decode the final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(line) = self.0.decode_eof(src).map_err(map_codec_error)? {
            if let Some(item) = classify(&line) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

/// Classify one line of the event stream.
///
/// Bare JSON lines (no `data:` prefix) are accepted as payloads so NDJSON
/// backends work unchanged.
#[must_use]
pub fn classify(line: &str) -> Option<StreamLine> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    if let Some(payload) = line.strip_prefix("data:") {
        let payload = payload.strip_prefix(' ').unwrap_or(payload);
        if payload == DONE_SENTINEL {
            return Some(StreamLine::Done);
        }
        if payload.is_empty() {
            return None;
        }
        return Some(StreamLine::Data(payload.to_owned()));
    }

    if line.starts_with('{') {
        return Some(StreamLine::Data(line.to_owned()));
    }

    trace!(line, "event stream: skipping non-data field");
    None
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Decode(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
