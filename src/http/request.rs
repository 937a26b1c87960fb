//! Per-connection request state.
//!
//! The request is read into one fixed buffer. The parser reports spans,
//! [`RequestFields`] stitches split pieces back together, and the
//! context decodes the path and arguments in place once enough has
//! arrived. All views borrow the buffer, so they end with the connection.
use heapless::Vec;

use super::parser::{Method, ParseError, ParserCallbacks, RequestParser};
use super::urlencoded::{self, Args};
use super::Span;
use crate::transport::{Transport, TransportError};

/// Request buffer size
pub const HTTP_BUF_LEN: usize = 8192;

/// Maximum number of headers kept per request. Extra headers are dropped.
pub const MAX_HEADERS: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub name: Span,
    pub value: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    None,
    Field,
    Value,
}

/// Parser callback sink accumulating spans for one request.
#[derive(Debug)]
pub struct RequestFields {
    url: Option<Span>,
    headers: Vec<Header, MAX_HEADERS>,
    /// Set while the current header is being dropped for lack of room
    dropping: bool,
    last: Last,
    body: Option<Span>,
    method: Option<Method>,
    headers_complete: bool,
    message_complete: bool,
}

impl RequestFields {
    pub const fn new() -> Self {
        Self {
            url: None,
            headers: Vec::new(),
            dropping: false,
            last: Last::None,
            body: None,
            method: None,
            headers_complete: false,
            message_complete: false,
        }
    }
}

impl Default for RequestFields {
    fn default() -> Self {
        Self::new()
    }
}

/// Extend `span` with an adjacent piece, or start it.
fn join(span: &mut Option<Span>, piece: Span) {
    match span {
        Some(s) => s.end = piece.end,
        None => *span = Some(piece),
    }
}

impl ParserCallbacks for RequestFields {
    fn on_url(&mut self, span: Span) {
        join(&mut self.url, span);
    }

    fn on_header_field(&mut self, span: Span) {
        if self.last == Last::Field {
            if !self.dropping {
                if let Some(h) = self.headers.last_mut() {
                    h.name.end = span.end;
                }
            }
        } else {
            self.dropping = self
                .headers
                .push(Header {
                    name: span,
                    value: Span::empty(span.end),
                })
                .is_err();
        }
        self.last = Last::Field;
    }

    fn on_header_value(&mut self, span: Span) {
        if !self.dropping {
            if let Some(h) = self.headers.last_mut() {
                if self.last == Last::Value {
                    h.value.end = span.end;
                } else {
                    h.value = span;
                }
            }
        }
        self.last = Last::Value;
    }

    fn on_headers_complete(&mut self, method: Method) {
        self.method = Some(method);
        self.headers_complete = true;
    }

    fn on_body(&mut self, span: Span) {
        join(&mut self.body, span);
    }

    fn on_message_complete(&mut self) {
        self.message_complete = true;
    }
}

/// One connection's request: buffer, parser and decoded views.
pub struct RequestContext<const N: usize = HTTP_BUF_LEN> {
    buf: [u8; N],
    used: usize,
    parser: RequestParser,
    fields: RequestFields,
    path: Span,
    args: Args,
    url_decoded: bool,
    body_decoded: bool,
}

impl<const N: usize> RequestContext<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            used: 0,
            parser: RequestParser::new(),
            fields: RequestFields::new(),
            path: Span::empty(0),
            args: Vec::new(),
            url_decoded: false,
            body_decoded: false,
        }
    }

    /// Forget the previous request. The buffer contents are left as is.
    pub fn reset(&mut self) {
        self.used = 0;
        self.parser.reset();
        self.fields = RequestFields::new();
        self.path = Span::empty(0);
        self.args.clear();
        self.url_decoded = false;
        self.body_decoded = false;
    }

    /// Read until the header block is complete. Returns false when the peer
    /// stopped sending, the request was malformed, or the buffer filled up.
    pub fn read_headers<T: Transport>(&mut self, stream: &mut T) -> bool {
        while !self.fields.headers_complete {
            if !self.read_chunk(stream) {
                return false;
            }
        }
        true
    }

    /// Read until the whole body has arrived. Returns false on the same
    /// conditions as [`read_headers`](Self::read_headers).
    pub fn read_body<T: Transport>(&mut self, stream: &mut T) -> bool {
        while !self.fields.message_complete {
            if !self.read_chunk(stream) {
                return false;
            }
        }
        true
    }

    fn read_chunk<T: Transport>(&mut self, stream: &mut T) -> bool {
        if self.used == N {
            log::warn!("HTTP: request exceeds {} bytes", N);
            return false;
        }
        let n = match stream.read(&mut self.buf[self.used..]) {
            Ok(0) => return false,
            Ok(n) => n,
            Err(TransportError::WouldBlock) => return true,
            Err(e) => {
                log::debug!("HTTP: read failed: {}", e);
                return false;
            }
        };
        match self.feed(n) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("HTTP: {}", e);
                false
            }
        }
    }

    /// Parse `n` freshly read bytes at the end of the buffer.
    fn feed(&mut self, n: usize) -> Result<(), ParseError> {
        let start = self.used;
        self.used += n;
        self.parser
            .execute(&self.buf[start..self.used], start, &mut self.fields)?;

        if self.fields.headers_complete && !self.url_decoded {
            self.url_decoded = true;
            self.decode_url();
        }
        if self.fields.message_complete && !self.body_decoded {
            self.body_decoded = true;
            if self.fields.method == Some(Method::Post) {
                if let Some(body) = self.fields.body {
                    urlencoded::split_args(&mut self.buf, body, &mut self.args);
                }
            }
        }
        Ok(())
    }

    /// Decode the path in place and, for `GET`, the query arguments.
    fn decode_url(&mut self) {
        let Some(url) = self.fields.url else {
            return;
        };
        let path = urlencoded::decode_in_place(&mut self.buf, url.start, url.end, b"?");
        self.path = path.value;
        if path.delimiter.is_some() && self.fields.method == Some(Method::Get) {
            let query = Span::new(path.next, url.end);
            urlencoded::split_args(&mut self.buf, query, &mut self.args);
        }
    }

    pub fn headers_complete(&self) -> bool {
        self.fields.headers_complete
    }

    pub fn is_complete(&self) -> bool {
        self.fields.message_complete
    }

    pub fn method(&self) -> Option<Method> {
        self.fields.method
    }

    /// Decoded path, without the query string.
    pub fn path(&self) -> &str {
        self.path.as_str(&self.buf)
    }

    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.fields
            .headers
            .iter()
            .find(|h| h.name.bytes(&self.buf).eq_ignore_ascii_case(name.as_bytes()))
            .map(|h| h.value.as_str(&self.buf))
    }

    pub fn header_count(&self) -> usize {
        self.fields.headers.len()
    }

    /// Decoded arguments in request order. Pairs that are not valid UTF-8
    /// read as empty strings.
    pub fn args(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args
            .iter()
            .map(move |kv| (kv.key.as_str(&self.buf), kv.value.as_str(&self.buf)))
    }

    /// First argument named `name`.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    /// Raw body bytes. After a `POST` completes these have been decoded in
    /// place and are only meaningful through [`args`](Self::args).
    pub fn body(&self) -> &[u8] {
        match self.fields.body {
            Some(body) => body.bytes(&self.buf),
            None => &[],
        }
    }
}

impl<const N: usize> Default for RequestContext<N> {
    fn default() -> Self {
        Self::new()
    }
}
