//! Line Protocol Parser
//!
//! The reactor accumulates raw socket bytes per connection. This module
//! splits that accumulator into complete lines and turns each line into
//! a [`Request`].
//!
//! ## How the Parser Works
//!
//! 1. Append incoming network data to the connection's `BytesMut`
//! 2. Call [`next_line`] until it returns `None`; each call detaches one
//!    complete line (terminator and optional `\r` removed)
//! 3. Call [`parse_line`] on each line
//! 4. Bytes after the last terminator stay in the buffer for the next read
//!
//! Parsing is lenient: a line that is not a well-formed request yields a
//! [`ParseError`] which the caller logs and otherwise ignores.

use crate::protocol::types::{verb, Request, CR, LF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Reasons a line could not be turned into a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line starts with neither `GET ` nor `PUT `
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// A `PUT` line with no space separating key and value
    #[error("PUT without value")]
    MissingValue,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Detaches the next complete line from the front of `buf`.
///
/// Returns `None` when `buf` holds no `\n`; the partial line is left in
/// place. The returned line excludes the `\n` and one trailing `\r`.
///
/// # Example
///
/// ```
/// use smartkv::protocol::next_line;
/// use bytes::BytesMut;
///
/// let mut buf = BytesMut::from(&b"GET a\r\nGET b"[..]);
/// assert_eq!(&next_line(&mut buf).unwrap()[..], b"GET a");
/// assert!(next_line(&mut buf).is_none());
/// assert_eq!(&buf[..], b"GET b");
/// ```
pub fn next_line(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == LF)?;
    let mut line = buf.split_to(pos + 1);
    line.truncate(pos);
    if line.last() == Some(&CR) {
        line.truncate(pos - 1);
    }
    Some(line.freeze())
}

/// Parses one request line.
///
/// - `GET <key>`: the key is everything after the verb, spaces included.
/// - `PUT <key> <value>`: the key runs up to the first space after the
///   verb; the value is everything after that space.
///
/// The line is a `Bytes`, so key and value are zero-copy slices of it.
pub fn parse_line(line: &Bytes) -> ParseResult<Request> {
    if line.starts_with(verb::GET) {
        return Ok(Request::Get {
            key: line.slice(verb::GET.len()..),
        });
    }

    if line.starts_with(verb::PUT) {
        let rest = &line[verb::PUT.len()..];
        let sep = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ParseError::MissingValue)?;
        let key_start = verb::PUT.len();
        let key_end = key_start + sep;
        return Ok(Request::Put {
            key: line.slice(key_start..key_end),
            value: line.slice(key_end + 1..),
        });
    }

    Err(ParseError::UnknownCommand(
        String::from_utf8_lossy(line).into_owned(),
    ))
}
