//! NDJSON framing for both the client transport and the evaluator transport.
//!
//! [`LineCodec`] is a [`LinesCodec`] with a hard cap on line length, so a
//! peer that never sends a newline cannot make the agent buffer without
//! bound. Framing failures surface as [`AppError`] so callers can tell a
//! recoverable oversized line ([`AppError::Protocol`]) from a dead stream
//! ([`AppError::Io`]).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default cap on inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec with a bounded line length.
#[derive(Debug)]
pub struct LineCodec {
    lines: LinesCodec,
    limit: usize,
}

impl LineCodec {
    /// Codec capped at [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }

    /// Codec capped at `limit` bytes per inbound line.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(limit),
            limit,
        }
    }

    fn framing_error(&self, err: LinesCodecError) -> AppError {
        match err {
            // The inner codec skips to the next newline on the following call.
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Protocol(format!("line too long: exceeded {} bytes", self.limit))
            }
            LinesCodecError::Io(io) => AppError::from(io),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        self.lines.decode(buf).map_err(|e| self.framing_error(e))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        self.lines.decode_eof(buf).map_err(|e| self.framing_error(e))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<()> {
        self.lines
            .encode(line.as_ref(), buf)
            .map_err(|e| self.framing_error(e))
    }
}
