//! RESP Protocol Implementation
//!
//! A complete implementation of the Redis Serialization Protocol (RESP v2):
//! an incremental parser for the inbound byte stream and an encoder covering
//! every reply shape the server produces.
//!
//! ## Modules
//!
//! - `types`: the [`RespValue`] enum and serialization
//! - `parser`: incremental parser for framed messages
//!
//! ## Example
//!
//! ```
//! use ringodis::protocol::{RespParser, RespValue};
//! use bytes::Bytes;
//!
//! let mut parser = RespParser::new();
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parser.parse(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! let reply = RespValue::bulk(Bytes::from("value"));
//! assert_eq!(reply.serialize(), b"$5\r\nvalue\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{ParseError, ParseResult, RespParser};
pub use types::RespValue;
