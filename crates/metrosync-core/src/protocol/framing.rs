//! Length-prefixed line framing for MetroSync.
//!
//! Wire format (bit-exact):
//! ```text
//! <decimal payload byte length>\n
//! <payload bytes>\n
//! ```
//!
//! The framer knows nothing about message content; it hands the exact
//! payload bytes to the codec.
//!
//! # Desynchronisation
//!
//! The format is not self-synchronising.  If a length line cannot be parsed,
//! or the payload is not followed by its newline, there is no reliable way to
//! find the next frame boundary, so every [`FrameError`] is connection-fatal:
//! the caller tears the connection down and may reconnect from scratch.
//! No resync heuristics are attempted.
//!
//! # Short reads
//!
//! TCP may deliver a frame across any number of `read()` calls.
//! `read_until` and `read_exact` both loop internally until their condition
//! is satisfied or the stream ends, so a frame split into single bytes is
//! reassembled exactly.  The length line is read through a `take` limit, so a
//! peer that never sends a newline cannot make the reader buffer without
//! bound.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload length accepted from a length line (1 MiB).
///
/// A larger value is treated as desynchronisation rather than an allocation
/// request.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Longest length line read before giving up: the 20 digits of `u64::MAX`
/// plus an optional `\r` and the `\n`.
const MAX_LEN_LINE: u64 = 22;

/// Errors produced while reading a frame.  All of them are connection-fatal.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The length line is not a non-negative decimal integer.
    #[error("protocol desynchronised: invalid length line {line:?}")]
    InvalidLength { line: String },

    /// The length line declares a payload larger than [`MAX_FRAME_LEN`].
    #[error("protocol desynchronised: frame length {len} exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    /// The stream ended part-way through a frame.
    #[error("stream ended mid-frame: {context}")]
    Truncated { context: &'static str },

    /// The payload was not followed by its terminating newline.
    #[error("protocol desynchronised: expected newline after payload, found byte 0x{found:02X}")]
    MissingTerminator { found: u8 },
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Builds one complete frame for `payload`.
///
/// # Examples
///
/// ```rust
/// use metrosync_core::encode_frame;
///
/// assert_eq!(encode_frame(b"{}"), b"2\n{}\n".to_vec());
/// assert_eq!(encode_frame(b""), b"0\n\n".to_vec());
/// ```
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len_line = payload.len().to_string();
    let mut buf = Vec::with_capacity(len_line.len() + payload.len() + 2);
    buf.extend_from_slice(len_line.as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(payload);
    buf.push(b'\n');
    buf
}

/// Writes one frame for `payload` and flushes the writer.
///
/// The whole frame is written with a single `write_all`, so as long as the
/// caller serialises access to `writer`, frames never interleave.
///
/// # Errors
///
/// Returns the underlying I/O error if the write or flush fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Reads one frame and returns its payload.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary (the
/// peer closed the connection between frames).  A zero-length frame is
/// well-formed and yields `Ok(Some(vec![]))`.
///
/// # Errors
///
/// Returns a [`FrameError`] for I/O failures, an unparseable or oversized
/// length line, a stream that ends mid-frame, or a payload that is not
/// followed by a newline.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut len_line = Vec::with_capacity(8);
    let n = (&mut *reader)
        .take(MAX_LEN_LINE)
        .read_until(b'\n', &mut len_line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if len_line.last() != Some(&b'\n') {
        if n as u64 >= MAX_LEN_LINE {
            return Err(FrameError::InvalidLength {
                line: String::from_utf8_lossy(&len_line).into_owned(),
            });
        }
        return Err(FrameError::Truncated {
            context: "length line",
        });
    }

    let len = parse_length_line(&len_line)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| eof_as_truncated(e, "payload"))?;

    let terminator = reader
        .read_u8()
        .await
        .map_err(|e| eof_as_truncated(e, "payload terminator"))?;
    if terminator != b'\n' {
        return Err(FrameError::MissingTerminator { found: terminator });
    }

    Ok(Some(payload))
}

/// Parses a length line (including its trailing `\n`, optionally `\r\n`).
fn parse_length_line(raw: &[u8]) -> Result<usize, FrameError> {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let invalid = || FrameError::InvalidLength {
        line: String::from_utf8_lossy(line).into_owned(),
    };

    // `usize::from_str` accepts a leading '+'; the wire format does not.
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)
}

fn eof_as_truncated(e: std::io::Error, context: &'static str) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Truncated { context }
    } else {
        FrameError::Io(e)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
