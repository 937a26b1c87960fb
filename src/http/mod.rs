//! Minimal HTTP/1.1 server for the configuration UI.
//!
//! One connection at a time, parsed incrementally into a fixed request
//! buffer. Everything the parser recognizes is reported as a [`Span`] into
//! that buffer rather than copied out.

pub mod parser;
pub mod request;
pub mod server;
pub mod urlencoded;

pub use parser::{Method, ParseError, ParserCallbacks, RequestParser};
pub use request::RequestContext;
pub use server::{HttpServer, Outcome, Route};

/// Byte range `start..end` into a request buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Zero-length span positioned at `at`.
    pub const fn empty(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }

    /// The span as text; empty if it is not valid UTF-8.
    pub fn as_str<'a>(&self, buf: &'a [u8]) -> &'a str {
        core::str::from_utf8(self.bytes(buf)).unwrap_or("")
    }
}
