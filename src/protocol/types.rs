//! RESP (Redis Serialization Protocol) values and the reply encoder.
//!
//! Every reply the server produces and every request it parses is a
//! [`RespValue`]. Each type starts with a prefix byte and ends with CRLF:
//!
//! - `+` Status: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'foo'\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk string: `$5\r\nhello\r\n`, null bulk: `$-1\r\n`
//! - `*` Array (multi-bulk): `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`, empty: `*0\r\n`

use bytes::Bytes;

/// The CRLF terminator used by the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// Protocol type prefixes.
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// The canned WRONGTYPE error message.
pub const WRONG_TYPE_ERR: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

/// A value in the RESP protocol, used for both parsed requests and
/// serialized replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line, e.g. `+OK` or `+PONG`.
    Status(String),

    /// Error condition, rendered with a leading `-`.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// Binary-safe string up to 512 MB.
    Bulk(Bytes),

    /// Null bulk, rendered as `$-1\r\n`.
    Null,

    /// Multi-bulk. A `Null` element renders as `$-1\r\n`.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn status(s: impl Into<String>) -> Self {
        RespValue::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::Bulk(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK\r\n`
    pub fn ok() -> Self {
        RespValue::Status("OK".to_string())
    }

    /// `+PONG\r\n`
    pub fn pong() -> Self {
        RespValue::Status("PONG".to_string())
    }

    /// `*0\r\n`
    pub fn empty_array() -> Self {
        RespValue::Array(Vec::new())
    }

    /// Builds a multi-bulk reply from raw arguments.
    pub fn from_args(args: impl IntoIterator<Item = Bytes>) -> Self {
        RespValue::Array(args.into_iter().map(RespValue::Bulk).collect())
    }

    /// `-WRONGTYPE Operation against a key holding the wrong kind of value\r\n`
    pub fn wrong_type_error() -> Self {
        RespValue::Error(WRONG_TYPE_ERR.to_string())
    }

    /// The reply surfaced for recovered executor panics: `-Err unknown\r\n`.
    pub fn unknown_error() -> Self {
        RespValue::Error("Err unknown".to_string())
    }

    /// `-ERR wrong number of arguments for '<cmd>'\r\n`
    pub fn arg_num_error(cmd: &str) -> Self {
        RespValue::Error(format!("ERR wrong number of arguments for '{}'", cmd))
    }

    /// `-ERR syntax error\r\n`
    pub fn syntax_error() -> Self {
        RespValue::Error("ERR syntax error".to_string())
    }

    /// Serializes the value to its on-wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes into an existing buffer, reusing its capacity.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// True iff the first encoded byte is `-`.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Flattens an inbound multi-bulk into a command line.
    ///
    /// A null bulk inside the array contributes an empty argument. Returns
    /// `None` for any non-array value: only multi-bulk requests are executable.
    pub fn into_command_line(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        RespValue::Bulk(b) => args.push(b),
                        RespValue::Null => args.push(Bytes::new()),
                        RespValue::Status(s) => args.push(Bytes::from(s)),
                        _ => return None,
                    }
                }
                Some(args)
            }
            _ => None,
        }
    }

    /// Attempts to view the inner bytes of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}
