//! In-place percent decoding and `key=value&...` splitting.
//!
//! Decoding never grows the text, so results are written back over the
//! encoded bytes and reported as [`Span`]s into the same buffer.
use heapless::Vec;

use super::Span;

/// Maximum number of arguments kept per request. Extra pairs are dropped.
pub const MAX_ARGS: usize = 32;

/// A decoded `key=value` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Span,
    pub value: Span,
}

pub type Args = Vec<KeyValue, MAX_ARGS>;

/// Result of decoding one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Decoded bytes
    pub value: Span,
    /// Delimiter that ended the token, if any
    pub delimiter: Option<u8>,
    /// Where the next token starts
    pub next: usize,
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `buf[start..end]` in place up to the first byte in `delimiters`.
///
/// `%XX` with two hex digits becomes one byte; any other `%` is kept
/// literally. `+` is not treated as a space.
pub fn decode_in_place(buf: &mut [u8], start: usize, end: usize, delimiters: &[u8]) -> Token {
    let mut read = start;
    let mut write = start;

    while read < end && !delimiters.contains(&buf[read]) {
        let escaped = if buf[read] == b'%' && read + 2 < end {
            hex_value(buf[read + 1]).zip(hex_value(buf[read + 2]))
        } else {
            None
        };
        match escaped {
            Some((hi, lo)) => {
                buf[write] = (hi << 4) | lo;
                read += 3;
            }
            None => {
                buf[write] = buf[read];
                read += 1;
            }
        }
        write += 1;
    }

    let delimiter = (read < end).then(|| buf[read]);
    Token {
        value: Span::new(start, write),
        delimiter,
        next: if delimiter.is_some() { read + 1 } else { read },
    }
}

/// Split and decode `buf[span]` as `k1=v1&k2=v2...` into `args`.
///
/// Pairs keep their order and keys may repeat. A key without `=` gets an
/// empty value. Pairs beyond [`MAX_ARGS`] are left undecoded.
pub fn split_args(buf: &mut [u8], span: Span, args: &mut Args) {
    args.clear();
    let mut pos = span.start;

    while pos < span.end && !args.is_full() {
        let key = decode_in_place(buf, pos, span.end, b"&=");
        let (value, next) = if key.delimiter == Some(b'=') {
            let value = decode_in_place(buf, key.next, span.end, b"&");
            (value.value, value.next)
        } else {
            (Span::empty(key.value.end), key.next)
        };
        // Cannot fail: fullness checked by the loop condition
        let _ = args.push(KeyValue {
            key: key.value,
            value,
        });
        pos = next;
    }
}
