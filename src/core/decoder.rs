//! Incremental decoder for newline-delimited JSON frames.
//!
//! Upstream chunks may end anywhere, including inside a line or inside a
//! multi-byte character, so bytes are buffered until a `\n` arrives.

use crate::infrastructure::entities::Frame;
use thiserror::Error;

/// A single line that could not be decoded. Scoped to that line only.
#[derive(Debug, Error)]
#[error("malformed frame {line:?}: {source}")]
pub struct DecodeError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder::default()
    }

    /// Appends raw bytes. Call [`FrameDecoder::next_frame`] until it returns
    /// `None` to drain the complete lines.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decodes the next complete line, skipping blank ones.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        loop {
            let newline = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(newline) = newline else {
                self.scanned = self.buffer.len();
                return None;
            };

            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.scanned = 0;

            if let Some(decoded) = decode_line(&line[..newline]) {
                return Some(decoded);
            }
        }
    }

    /// Decodes whatever is left once the upstream closed the body. A final
    /// line is allowed to miss its terminating newline.
    pub fn finish(&mut self) -> Option<Result<Frame, DecodeError>> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        decode_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<Frame, DecodeError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    Some(
        serde_json::from_slice::<Frame>(line).map_err(|source| DecodeError {
            line: String::from_utf8_lossy(line).into_owned(),
            source,
        }),
    )
}
