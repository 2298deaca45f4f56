//! Incremental RESP parser.
//!
//! The parser consumes a caller-owned buffer and returns either:
//!
//! - `Ok(Some((value, consumed)))` - one complete top-level message,
//!   `consumed` bytes were used
//! - `Ok(None)` - the message is incomplete, read more bytes first
//! - `Err(ParseError)` - the framing is malformed
//!
//! The caller appends network data to its buffer, calls [`RespParser::parse`],
//! advances the buffer on success, and waits for more data on `None`. On a
//! framing error the caller reports `protocol error: ...` and discards its
//! buffer, which resets the stream at the next message boundary.
//!
//! Line framing is strict: a line ends at LF, and the byte before the LF must
//! be CR. Bulk bodies are read as exactly `len + 2` bytes with the trailing
//! CRLF verified.

use crate::protocol::types::{prefix, RespValue};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding the byte stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Framing or grammar violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bulk string larger than [`MAX_BULK_SIZE`].
    #[error("protocol error: bulk length {0} exceeds {MAX_BULK_SIZE}")]
    BulkTooLarge(i64),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// An incremental RESP parser.
///
/// The parser itself is stateless between top-level messages; all progress
/// lives in the caller's buffer, so a partially received message is simply
/// re-parsed once more bytes arrive.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Attempts to parse one top-level RESP message from `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        parse_value(buf)
    }
}

fn parse_value(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        prefix::STATUS => parse_line(buf, |line| Ok(RespValue::Status(line.to_string()))),
        prefix::ERROR => parse_line(buf, |line| Ok(RespValue::Error(line.to_string()))),
        prefix::INTEGER => parse_line(buf, |line| {
            line.parse::<i64>()
                .map(RespValue::Integer)
                .map_err(|_| ParseError::Protocol(format!("invalid integer '{}'", line)))
        }),
        prefix::BULK => parse_bulk(buf),
        prefix::ARRAY => parse_array(buf),
        other => Err(ParseError::Protocol(format!(
            "unexpected message type {:?}",
            other as char
        ))),
    }
}

/// Parses a single-line message (`+`, `-` or `:`), applying `convert` to the
/// line content after the prefix byte.
fn parse_line<F>(buf: &[u8], convert: F) -> ParseResult<Option<(RespValue, usize)>>
where
    F: FnOnce(&str) -> ParseResult<RespValue>,
{
    match read_line(&buf[1..])? {
        Some((content, line_len)) => {
            let line = std::str::from_utf8(content)
                .map_err(|_| ParseError::Protocol("invalid utf-8 in line".to_string()))?;
            Ok(Some((convert(line)?, 1 + line_len)))
        }
        None => Ok(None),
    }
}

/// Parses `$<len>\r\n<data>\r\n`. `$-1\r\n` yields [`RespValue::Null`].
fn parse_bulk(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let (len, header_len) = match read_length(&buf[1..])? {
        Some(v) => v,
        None => return Ok(None),
    };
    let header_len = header_len + 1;

    if len == -1 {
        return Ok(Some((RespValue::Null, header_len)));
    }
    if len < 0 {
        return Err(ParseError::Protocol(format!("invalid bulk length {}", len)));
    }
    if len as usize > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge(len));
    }

    let len = len as usize;
    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[header_len + len..total] != b"\r\n" {
        return Err(ParseError::Protocol(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + len]);
    Ok(Some((RespValue::Bulk(data), total)))
}

/// Parses `*<count>\r\n<items...>`. `*0\r\n` yields an empty array directly.
fn parse_array(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let (count, header_len) = match read_length(&buf[1..])? {
        Some(v) => v,
        None => return Ok(None),
    };
    let header_len = header_len + 1;

    if count < 0 {
        return Err(ParseError::Protocol(format!(
            "invalid multibulk length {}",
            count
        )));
    }

    let count = count as usize;
    let mut items = Vec::with_capacity(count);
    let mut consumed = header_len;

    for _ in 0..count {
        match parse_value(&buf[consumed..])? {
            Some((item, n)) => {
                items.push(item);
                consumed += n;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(items), consumed)))
}

/// Reads a decimal length line, as used by `$` and `*` headers.
fn read_length(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_line(buf)? {
        Some((content, line_len)) => {
            let s = std::str::from_utf8(content)
                .map_err(|_| ParseError::Protocol("invalid utf-8 in length".to_string()))?;
            let len = s
                .parse::<i64>()
                .map_err(|_| ParseError::Protocol(format!("invalid length '{}'", s)))?;
            Ok(Some((len, line_len)))
        }
        None => Ok(None),
    }
}

/// Finds the next LF and returns the line content before CRLF plus the total
/// line length including the terminator. The byte before the LF must be CR.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(0) => Err(ParseError::Protocol("line feed without carriage return".to_string())),
        Some(pos) => {
            if buf[pos - 1] != b'\r' {
                return Err(ParseError::Protocol(
                    "line feed without carriage return".to_string(),
                ));
            }
            Ok(Some((&buf[..pos - 1], pos + 1)))
        }
        None => Ok(None),
    }
}
