//! Line Protocol Data Types
//!
//! This module defines the requests a client can send and the responses
//! the server writes back. Every message is a single line terminated by
//! `\n`; a trailing `\r` on requests is tolerated.
//!
//! ## Requests
//!
//! ```text
//! GET <key>\n
//! PUT <key> <value>\n        (value may contain spaces)
//! ```
//!
//! ## Responses
//!
//! ```text
//! OK <value>\n               value read from the store
//! OK cache hit<value>\n      value served from the cache (no separator)
//! MISS\n                     key absent
//! OK\n                       PUT accepted by the store
//! ERR <message>\n            PUT rejected, message from the store
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The line terminator used by the protocol
pub const LF: u8 = b'\n';

/// Optional carriage return stripped from request lines
pub const CR: u8 = b'\r';

/// Request verbs, including their trailing separator
pub mod verb {
    pub const GET: &[u8] = b"GET ";
    pub const PUT: &[u8] = b"PUT ";
}

/// Literal prefix written before a value served from the cache.
/// No space separates it from the value.
pub const CACHE_HIT_PREFIX: &[u8] = b"OK cache hit";

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `GET <key>`
    Get { key: Bytes },

    /// `PUT <key> <value>`
    Put { key: Bytes, value: Bytes },
}

impl Request {
    /// Returns the key this request targets.
    pub fn key(&self) -> &Bytes {
        match self {
            Request::Get { key } | Request::Put { key, .. } => key,
        }
    }
}

/// A response to a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Value read from the backing store: `OK <value>`
    Value(Bytes),

    /// Value served from the cache: `OK cache hit<value>`
    CacheHit(Bytes),

    /// Key not found: `MISS`
    Miss,

    /// Write accepted: `OK`
    Stored,

    /// Request failed: `ERR <message>`
    Error(String),
}

impl Response {
    /// Creates an error response.
    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error(msg.into())
    }

    /// Serializes this response to its wire form, terminator included.
    ///
    /// # Example
    /// ```
    /// use smartkv::protocol::Response;
    /// use bytes::Bytes;
    ///
    /// assert_eq!(&Response::Value(Bytes::from("v")).serialize()[..], b"OK v\n");
    /// assert_eq!(&Response::Miss.serialize()[..], b"MISS\n");
    /// ```
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Writes the wire form into an existing buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Response::Value(v) => {
                buf.put_slice(b"OK ");
                buf.put_slice(v);
            }
            Response::CacheHit(v) => {
                buf.put_slice(CACHE_HIT_PREFIX);
                buf.put_slice(v);
            }
            Response::Miss => buf.put_slice(b"MISS"),
            Response::Stored => buf.put_slice(b"OK"),
            Response::Error(msg) => {
                buf.put_slice(b"ERR ");
                buf.put_slice(msg.as_bytes());
            }
        }
        buf.put_u8(LF);
    }

    fn serialized_len(&self) -> usize {
        1 + match self {
            Response::Value(v) => 3 + v.len(),
            Response::CacheHit(v) => CACHE_HIT_PREFIX.len() + v.len(),
            Response::Miss => 4,
            Response::Stored => 2,
            Response::Error(msg) => 4 + msg.len(),
        }
    }

    /// Returns true if this response was served from the cache.
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Response::CacheHit(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(v) => write!(f, "OK {}", String::from_utf8_lossy(v)),
            Response::CacheHit(v) => write!(f, "OK cache hit{}", String::from_utf8_lossy(v)),
            Response::Miss => write!(f, "MISS"),
            Response::Stored => write!(f, "OK"),
            Response::Error(msg) => write!(f, "ERR {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_value() {
        let resp = Response::Value(Bytes::from("hello world"));
        assert_eq!(resp.serialize(), Bytes::from("OK hello world\n"));
    }

    #[test]
    fn test_serialize_cache_hit_has_no_separator() {
        let resp = Response::CacheHit(Bytes::from("hello world"));
        assert_eq!(resp.serialize(), Bytes::from("OK cache hithello world\n"));
        assert!(resp.is_cache_hit());
    }

    #[test]
    fn test_serialize_fixed_responses() {
        assert_eq!(Response::Miss.serialize(), Bytes::from("MISS\n"));
        assert_eq!(Response::Stored.serialize(), Bytes::from("OK\n"));
    }

    #[test]
    fn test_serialize_error() {
        let resp = Response::error("disk full");
        assert_eq!(resp.serialize(), Bytes::from("ERR disk full\n"));
    }

    #[test]
    fn test_serialized_len_matches() {
        let cases = [
            Response::Value(Bytes::from("abc")),
            Response::CacheHit(Bytes::from("abc")),
            Response::Miss,
            Response::Stored,
            Response::error("boom"),
        ];
        for resp in cases {
            assert_eq!(resp.serialize().len(), resp.serialized_len());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Response::Value(Bytes::from("v")).to_string(), "OK v");
        assert_eq!(Response::error("x").to_string(), "ERR x");
    }

    #[test]
    fn test_request_key() {
        let get = Request::Get {
            key: Bytes::from("a"),
        };
        let put = Request::Put {
            key: Bytes::from("b"),
            value: Bytes::from("c"),
        };
        assert_eq!(get.key(), &Bytes::from("a"));
        assert_eq!(put.key(), &Bytes::from("b"));
    }
}
