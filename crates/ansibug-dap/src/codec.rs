//! `Content-Length` framing for DAP messages over blocking streams.

use std::io::{self, BufRead, Read, Write};

use serde::Serialize;
use thiserror::Error;

use crate::{MAX_DAP_HEADER_LINE_BYTES, MAX_DAP_MESSAGE_BYTES};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("DAP header line exceeds {MAX_DAP_HEADER_LINE_BYTES} bytes")]
    HeaderTooLong,
    #[error("DAP header line is not UTF-8")]
    HeaderNotUtf8,
    #[error("DAP message missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),
    #[error("DAP message Content-Length {0} exceeds {MAX_DAP_MESSAGE_BYTES} bytes")]
    TooLarge(usize),
    /// The stream ended part way through a frame.
    #[error("connection closed inside a DAP frame")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Strip user-supplied scalar values out of a `serde_json` error string.
///
/// Evaluate expressions and variable values can carry secrets (vault data,
/// passwords in host vars), and serde echoes offending values in its messages:
/// `invalid type: string "..."` or ``unknown field `...` ``.
pub fn sanitize_json_error_message(message: &str) -> String {
    let parts: Vec<&str> = message.split('"').collect();
    let last = parts.len() - 1;
    let unquoted = parts
        .iter()
        .enumerate()
        // Odd parts are quoted, except a trailing unterminated one.
        .map(|(index, &part)| {
            if index % 2 == 1 && index != last {
                "<redacted>"
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join("\"");

    // Only the first backticked name is the offending value; the rest list
    // the expected names.
    let mut segments = unquoted.splitn(3, '`');
    if let (Some(before), Some(_), Some(after)) = (segments.next(), segments.next(), segments.next())
    {
        return format!("{before}`<redacted>`{after}");
    }
    unquoted
}

/// Next header line with its terminator, or `None` at EOF.
fn next_header<R: BufRead>(reader: &mut R) -> Result<Option<String>, FrameError> {
    let mut line = Vec::new();
    let limit = MAX_DAP_HEADER_LINE_BYTES as u64 + 1;
    if reader.by_ref().take(limit).read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.len() > MAX_DAP_HEADER_LINE_BYTES {
        return Err(FrameError::HeaderTooLong);
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| FrameError::HeaderNotUtf8)
}

fn content_length_value(line: &str) -> Option<&str> {
    let (name, value) = line.split_once(':')?;
    name.trim()
        .eq_ignore_ascii_case("Content-Length")
        .then(|| value.trim())
}

fn read_body<R: Read>(reader: &mut R, length: usize) -> Result<Vec<u8>, FrameError> {
    if length > MAX_DAP_MESSAGE_BYTES {
        return Err(FrameError::TooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::Truncated,
        _ => FrameError::Io(err),
    })?;
    Ok(body)
}

/// Read one `Content-Length` framed payload from `reader`.
///
/// Returns `Ok(None)` on a clean EOF between frames, and
/// [`FrameError::Truncated`] when the peer goes away mid-frame. Headers other
/// than `Content-Length` are ignored.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut content_length = None;
    let mut started = false;

    while let Some(line) = next_header(reader)? {
        started = true;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            let length = content_length.ok_or(FrameError::MissingContentLength)?;
            return read_body(reader, length).map(Some);
        }
        if let Some(value) = content_length_value(line) {
            let length = value
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.to_owned()))?;
            content_length = Some(length);
        }
    }

    if started {
        Err(FrameError::Truncated)
    } else {
        Ok(None)
    }
}

/// Write `payload` as a single framed DAP message and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Serialize `message` to JSON and write it as a single framed DAP message.
pub fn write_json_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let payload = serde_json::to_vec(message).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            sanitize_json_error_message(&err.to_string()),
        )
    })?;
    write_frame(writer, &payload)
}
