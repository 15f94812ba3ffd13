//! C2 — Line Framing.
//!
//! Reads CR/LF-delimited text from a byte stream with a per-call deadline,
//! yielding one logical line per call. `\r` and embedded NUL bytes are
//! dropped from the logical line; they are not frame delimiters.

use crate::error::ConnectError;
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};

const DEFAULT_CAPACITY: usize = 1500;
const DEFAULT_MAX_LINE_LEN: usize = 8192;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Line(String),
    /// No complete line arrived before the deadline. Any partially read
    /// bytes remain buffered for the next call; this is not an error.
    Timeout,
}

pub struct LineReader<R> {
    stream: R,
    buf: BytesMut,
    max_line_len: usize,
    /// Set once the current (unterminated) line has exceeded `max_line_len`;
    /// further bytes are discarded until the terminating `\n` is found.
    overflowing: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R) -> Self {
        Self::with_limits(stream, DEFAULT_CAPACITY, DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_limits(stream: R, capacity: usize, max_line_len: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(capacity),
            max_line_len,
            overflowing: false,
        }
    }

    /// Reads one logical line, waiting at most `timeout` for it to arrive.
    pub async fn read_line(
        &mut self,
        timeout: Duration,
    ) -> Result<LineOutcome, ConnectError> {
        if let Some(raw) = self.try_extract_buffered() {
            return Ok(LineOutcome::Line(sanitize(&raw, self.max_line_len)));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(LineOutcome::Timeout);
            }

            let mut scratch = [0u8; READ_CHUNK];
            match time::timeout(remaining, self.stream.read(&mut scratch)).await {
                Err(_elapsed) => return Ok(LineOutcome::Timeout),
                Ok(Ok(0)) => {
                    return Err(ConnectError::SocketError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )))
                }
                Ok(Ok(n)) => {
                    if let Some(raw) = self.ingest(&scratch[..n]) {
                        return Ok(LineOutcome::Line(sanitize(&raw, self.max_line_len)));
                    }
                    // no complete line yet; keep looping within the deadline
                }
                Ok(Err(e)) => return Err(ConnectError::SocketError(e)),
            }
        }
    }

    /// Extracts a line already fully present in `buf` (e.g. leftover bytes
    /// from a chunk that contained more than one line) without touching the
    /// socket.
    fn try_extract_buffered(&mut self) -> Option<Vec<u8>> {
        let idx = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(idx).to_vec();
        self.buf.advance(1); // drop the '\n' itself
        if line.len() > self.max_line_len {
            line.truncate(self.max_line_len);
        }
        Some(line)
    }

    /// Folds a freshly read chunk into the line buffer. Returns the
    /// completed line's raw bytes (not yet sanitized) if `chunk` contained a
    /// `\n`; any bytes after it are kept buffered for the next line.
    fn ingest(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if let Some(idx) = chunk.iter().position(|&b| b == b'\n') {
            if !self.overflowing {
                self.buf.extend_from_slice(&chunk[..idx]);
            }
            let mut line = std::mem::take(&mut self.buf).to_vec();
            if line.len() > self.max_line_len {
                line.truncate(self.max_line_len);
            }
            self.overflowing = false;
            self.buf.extend_from_slice(&chunk[idx + 1..]);
            Some(line)
        } else {
            if !self.overflowing {
                self.buf.extend_from_slice(chunk);
                if self.buf.len() > self.max_line_len {
                    self.buf.truncate(self.max_line_len);
                    self.overflowing = true;
                }
            }
            None
        }
    }
}

/// Drops `\r` and embedded NUL bytes and enforces the length cap on the
/// final text.
fn sanitize(raw: &[u8], max_line_len: usize) -> String {
    let mut cleaned: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|&b| b != b'\r' && b != 0)
        .collect();
    cleaned.truncate(max_line_len);
    String::from_utf8_lossy(&cleaned).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn read_all_lines(data: &[u8]) -> Vec<LineOutcome> {
        let mut reader = LineReader::new(Cursor::new(data.to_vec()));
        let mut out = Vec::new();
        loop {
            match reader.read_line(Duration::from_millis(50)).await {
                Ok(LineOutcome::Line(l)) => out.push(LineOutcome::Line(l)),
                Ok(LineOutcome::Timeout) => {
                    out.push(LineOutcome::Timeout);
                    break;
                }
                Err(_) => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn splits_on_newline_and_drops_cr() {
        let lines = read_all_lines(b"A\r\nB\n").await;
        assert_eq!(
            lines,
            vec![
                LineOutcome::Line("A".to_string()),
                LineOutcome::Line("B".to_string()),
                LineOutcome::Timeout,
            ]
        );
    }

    #[tokio::test]
    async fn handles_line_split_across_reads() {
        // simulate two reads by feeding them through separate cursors that
        // share the same reader state
        let mut reader = LineReader::new(Cursor::new(b"A\r".to_vec()));
        let first = reader.read_line(Duration::from_millis(30)).await.unwrap();
        assert_eq!(first, LineOutcome::Timeout);

        // continue the same reader with a fresh source by re-wrapping is not
        // possible for Cursor, so verify buffering directly via ingest
        let completed = reader.ingest(b"\nB\n");
        assert_eq!(completed, Some(b"A\r".to_vec()));
    }

    #[tokio::test]
    async fn truncates_overly_long_lines() {
        let mut long_line = vec![b'x'; 20];
        long_line.push(b'\n');
        let mut reader = LineReader::with_limits(Cursor::new(long_line), 16, 10);
        match reader.read_line(Duration::from_millis(50)).await.unwrap() {
            LineOutcome::Line(l) => assert_eq!(l.len(), 10),
            other => panic!("expected a line, got {:?}", other),
        }
    }
}
