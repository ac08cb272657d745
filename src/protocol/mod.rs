//! Line Protocol Implementation
//!
//! SmartKV speaks a minimal newline-delimited text protocol.
//!
//! ## Modules
//!
//! - `types`: `Request` / `Response` and their wire forms
//! - `parser`: line extraction and request parsing
//!
//! ## Example
//!
//! ```
//! use smartkv::protocol::{next_line, parse_line, Request, Response};
//! use bytes::{Bytes, BytesMut};
//!
//! let mut buf = BytesMut::from(&b"PUT a hello world\n"[..]);
//! let line = next_line(&mut buf).unwrap();
//! let request = parse_line(&line).unwrap();
//! assert_eq!(request, Request::Put { key: Bytes::from("a"), value: Bytes::from("hello world") });
//!
//! assert_eq!(Response::Stored.serialize(), Bytes::from("OK\n"));
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{next_line, parse_line, ParseError, ParseResult};
pub use types::{Request, Response};
