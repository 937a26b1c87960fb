//! Incremental HTTP/1.1 request parser.
//!
//! Bytes are fed in whatever chunks the socket delivers, each tagged with
//! its absolute offset in the request buffer so callbacks can report
//! [`Span`]s. A field cut by a chunk boundary produces one callback per
//! piece; the pieces are adjacent in the buffer.
//!
//! Only what the configuration UI sends is supported: a request line,
//! plain headers, and an optional `Content-Length` body. No chunked
//! transfer-encoding and no folded header lines.
use heapless::Vec;

use super::Span;

const CONTENT_LENGTH: &[u8] = b"content-length";
const MAX_METHOD_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Other,
}

impl Method {
    pub fn from_bytes(name: &[u8]) -> Self {
        match name {
            b"GET" => Method::Get,
            b"HEAD" => Method::Head,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"OPTIONS" => Method::Options,
            b"PATCH" => Method::Patch,
            _ => Method::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other => "?",
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidMethod,
    InvalidRequestLine,
    InvalidHeader,
    InvalidContentLength,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::InvalidMethod => f.write_str("invalid method"),
            ParseError::InvalidRequestLine => f.write_str("invalid request line"),
            ParseError::InvalidHeader => f.write_str("invalid header line"),
            ParseError::InvalidContentLength => f.write_str("invalid Content-Length"),
        }
    }
}

/// Receives parse events. Every method defaults to doing nothing.
pub trait ParserCallbacks {
    fn on_url(&mut self, _span: Span) {}
    fn on_header_field(&mut self, _span: Span) {}
    /// Fires at least once per header; an empty value yields one empty span.
    fn on_header_value(&mut self, _span: Span) {}
    fn on_headers_complete(&mut self, _method: Method) {}
    fn on_body(&mut self, _span: Span) {}
    fn on_message_complete(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Method,
    Url,
    Version,
    LineStart,
    Field,
    ValueStart,
    Value,
    LineEnd,
    HeadersEnd,
    Body,
    Done,
    Failed(ParseError),
}

pub struct RequestParser {
    state: State,
    method: Vec<u8, MAX_METHOD_LEN>,
    /// Bytes of `content-length` matched so far in the current field name
    cl_matched: Option<usize>,
    in_content_length: bool,
    cl_trailing_ws: bool,
    content_length: usize,
    body_remaining: usize,
}

impl RequestParser {
    pub const fn new() -> Self {
        Self {
            state: State::Method,
            method: Vec::new(),
            cl_matched: None,
            in_content_length: false,
            cl_trailing_ws: false,
            content_length: 0,
            body_remaining: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn method(&self) -> Method {
        Method::from_bytes(&self.method)
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feed `data`, which starts at `offset` in the request buffer.
    ///
    /// Returns how many bytes were consumed. That is all of `data` unless
    /// the message ended inside it. Once a parse error occurs every further
    /// call reports the same error.
    pub fn execute<C: ParserCallbacks>(
        &mut self,
        data: &[u8],
        offset: usize,
        cb: &mut C,
    ) -> Result<usize, ParseError> {
        let result = self.run(data, offset, cb);
        if let Err(e) = result {
            self.state = State::Failed(e);
        }
        result
    }

    fn run<C: ParserCallbacks>(
        &mut self,
        data: &[u8],
        offset: usize,
        cb: &mut C,
    ) -> Result<usize, ParseError> {
        // Start of the field piece inside this chunk
        let mut mark = match self.state {
            State::Url | State::Field | State::Value => Some(0),
            _ => None,
        };

        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            match self.state {
                State::Method => {
                    if b == b' ' {
                        if self.method.is_empty() {
                            return Err(ParseError::InvalidMethod);
                        }
                        self.state = State::Url;
                        mark = Some(i + 1);
                    } else if !b.is_ascii_uppercase() || self.method.push(b).is_err() {
                        return Err(ParseError::InvalidMethod);
                    }
                }
                State::Url => match b {
                    b' ' => {
                        emit(mark.take(), i, offset, |s| cb.on_url(s));
                        self.state = State::Version;
                    }
                    b'\r' | b'\n' => return Err(ParseError::InvalidRequestLine),
                    _ => {}
                },
                State::Version => {
                    if b == b'\n' {
                        self.state = State::LineStart;
                    }
                }
                State::LineStart => match b {
                    b'\r' => self.state = State::HeadersEnd,
                    b'\n' => {
                        if self.finish_headers(cb) {
                            return Ok(i + 1);
                        }
                    }
                    b' ' | b'\t' | b':' => return Err(ParseError::InvalidHeader),
                    _ => {
                        self.state = State::Field;
                        self.cl_matched = Some(0);
                        self.match_field(b);
                        mark = Some(i);
                    }
                },
                State::Field => match b {
                    b':' => {
                        emit(mark.take(), i, offset, |s| cb.on_header_field(s));
                        self.in_content_length = self.cl_matched == Some(CONTENT_LENGTH.len());
                        if self.in_content_length {
                            self.content_length = 0;
                        }
                        self.state = State::ValueStart;
                    }
                    b'\r' | b'\n' | b' ' | b'\t' => return Err(ParseError::InvalidHeader),
                    _ => self.match_field(b),
                },
                State::ValueStart => match b {
                    b' ' | b'\t' => {}
                    b'\r' | b'\n' => {
                        cb.on_header_value(Span::empty(offset + i));
                        self.end_value(b);
                    }
                    _ => {
                        self.value_byte(b)?;
                        self.state = State::Value;
                        mark = Some(i);
                    }
                },
                State::Value => match b {
                    b'\r' | b'\n' => {
                        emit(mark.take(), i, offset, |s| cb.on_header_value(s));
                        self.end_value(b);
                    }
                    _ => self.value_byte(b)?,
                },
                State::LineEnd => {
                    if b != b'\n' {
                        return Err(ParseError::InvalidHeader);
                    }
                    self.state = State::LineStart;
                }
                State::HeadersEnd => {
                    if b != b'\n' {
                        return Err(ParseError::InvalidHeader);
                    }
                    if self.finish_headers(cb) {
                        return Ok(i + 1);
                    }
                }
                State::Body => {
                    let take = self.body_remaining.min(data.len() - i);
                    cb.on_body(Span::new(offset + i, offset + i + take));
                    self.body_remaining -= take;
                    i += take;
                    if self.body_remaining == 0 {
                        self.state = State::Done;
                        cb.on_message_complete();
                        return Ok(i);
                    }
                    continue;
                }
                State::Done => return Ok(i),
                State::Failed(e) => return Err(e),
            }
            i += 1;
        }

        // Report the piece of a field cut off by the end of this chunk
        match self.state {
            State::Url => emit(mark, data.len(), offset, |s| cb.on_url(s)),
            State::Field => emit(mark, data.len(), offset, |s| cb.on_header_field(s)),
            State::Value => emit(mark, data.len(), offset, |s| cb.on_header_value(s)),
            _ => {}
        }
        Ok(data.len())
    }

    fn match_field(&mut self, b: u8) {
        self.cl_matched = self
            .cl_matched
            .filter(|&n| n < CONTENT_LENGTH.len() && CONTENT_LENGTH[n] == b.to_ascii_lowercase())
            .map(|n| n + 1);
    }

    fn value_byte(&mut self, b: u8) -> Result<(), ParseError> {
        if !self.in_content_length {
            return Ok(());
        }
        match b {
            b'0'..=b'9' if !self.cl_trailing_ws => {
                self.content_length = self
                    .content_length
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(usize::from(b - b'0')))
                    .ok_or(ParseError::InvalidContentLength)?;
                Ok(())
            }
            b' ' | b'\t' => {
                self.cl_trailing_ws = true;
                Ok(())
            }
            _ => Err(ParseError::InvalidContentLength),
        }
    }

    fn end_value(&mut self, terminator: u8) {
        self.in_content_length = false;
        self.cl_trailing_ws = false;
        self.state = if terminator == b'\r' {
            State::LineEnd
        } else {
            State::LineStart
        };
    }

    /// Returns true when the message has no body and is therefore complete.
    fn finish_headers<C: ParserCallbacks>(&mut self, cb: &mut C) -> bool {
        cb.on_headers_complete(self.method());
        if self.content_length > 0 {
            self.body_remaining = self.content_length;
            self.state = State::Body;
            false
        } else {
            self.state = State::Done;
            cb.on_message_complete();
            true
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(mark: Option<usize>, end: usize, offset: usize, f: impl FnOnce(Span)) {
    if let Some(start) = mark {
        if start < end {
            f(Span::new(offset + start, offset + end));
        }
    }
}
