//! # MQTT 3.1.1 Framing
//!
//! Remaining-length varint, CONNECT / PUBLISH encoding and incremental
//! inbound frame parsing over a fixed-size receive buffer.

/// Largest value the 4-byte remaining-length field can carry.
pub const MAX_REMAINING_LEN: usize = 268_435_455;

/// Size of the inbound frame buffer.
pub const RX_BUF_LEN: usize = 512;

/// Fixed header byte + up to 4 length bytes.
pub const MAX_FIXED_HEADER_LEN: usize = 5;

/// Longest config string placed in a CONNECT frame.
pub const MAX_FIELD_LEN: usize = 64;

/// Room for a CONNECT with client id, username and password at their maximum lengths.
pub const CONNECT_BUF_LEN: usize = MAX_FIXED_HEADER_LEN + 10 + 3 * (2 + MAX_FIELD_LEN);

/// PUBLISH fixed header plus the 2-byte topic length.
pub const PUBLISH_HEADER_LEN: usize = MAX_FIXED_HEADER_LEN + 2;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Remaining length used more than 4 bytes
    MalformedLength,
    /// Value does not fit the remaining-length field or a 2-byte string length
    TooLarge,
    BufferTooSmall,
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::MalformedLength => f.write_str("malformed remaining length"),
            CodecError::TooLarge => f.write_str("length exceeds protocol limit"),
            CodecError::BufferTooSmall => f.write_str("buffer too small"),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketType {
    Reserved = 0,
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Reserved2 = 15,
}

impl PacketType {
    /// Packet type from the upper nibble of a fixed header byte.
    pub fn from_header(byte: u8) -> Self {
        match byte >> 4 {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            15 => PacketType::Reserved2,
            _ => PacketType::Reserved,
        }
    }

    pub const fn header_byte(self) -> u8 {
        (self as u8) << 4
    }
}

// ── Remaining length ───────────────────────────────────────────────────

/// Encode `len` as a base-128 varint into `buf`, returning the byte count.
pub fn encode_remaining_length(mut len: usize, buf: &mut [u8]) -> Result<usize, CodecError> {
    if len > MAX_REMAINING_LEN {
        return Err(CodecError::TooLarge);
    }
    let mut i = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        *buf.get_mut(i).ok_or(CodecError::BufferTooSmall)? = byte;
        i += 1;
        if len == 0 {
            return Ok(i);
        }
    }
}

/// Decode a varint from the start of `buf`.
///
/// Returns `Ok(None)` when the terminating byte has not arrived yet, or
/// `Ok(Some((value, bytes_consumed)))`.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value += ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        Err(CodecError::MalformedLength)
    } else {
        Ok(None)
    }
}

// ── Inbound frames ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Lower nibble of the first byte
    pub flags: u8,
    pub remaining_len: usize,
    /// Bytes taken by the type byte and the varint
    pub header_len: usize,
}

impl FixedHeader {
    pub fn frame_len(&self) -> usize {
        self.header_len + self.remaining_len
    }
}

/// Parse the fixed header at the start of `buf`, if enough bytes are present.
pub fn parse_fixed_header(buf: &[u8]) -> Result<Option<FixedHeader>, CodecError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    Ok(decode_remaining_length(&buf[1..])?.map(|(remaining_len, n)| FixedHeader {
        packet_type: PacketType::from_header(first),
        flags: first & 0x0F,
        remaining_len,
        header_len: 1 + n,
    }))
}

/// Outcome of one [`ReceiveBuffer::next_frame`] step.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<R> {
    /// Need more bytes
    Incomplete,
    /// Frame larger than the buffer; its bytes are being discarded
    Skipping,
    Frame(R),
}

/// Fixed-size inbound buffer with a pending-discard counter for oversized frames.
pub struct ReceiveBuffer<const N: usize = RX_BUF_LEN> {
    buf: [u8; N],
    used: usize,
    skip: usize,
}

impl<const N: usize> ReceiveBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            used: 0,
            skip: 0,
        }
    }

    /// Free space for the next transport read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.used..]
    }

    /// Account for `n` bytes just read into [`spare_mut`](Self::spare_mut),
    /// dropping any that belong to a frame being skipped.
    pub fn commit(&mut self, n: usize) {
        if self.skip >= n {
            self.skip -= n;
            return;
        }
        let start = self.used;
        if self.skip > 0 {
            self.buf.copy_within(start + self.skip..start + n, start);
        }
        self.used += n - self.skip;
        self.skip = 0;
    }

    /// Parse and consume the frame at the front of the buffer.
    ///
    /// `on_frame` sees the header and the frame body (bytes after the header).
    pub fn next_frame<R>(
        &mut self,
        on_frame: impl FnOnce(&FixedHeader, &[u8]) -> R,
    ) -> Result<Decoded<R>, CodecError> {
        let Some(header) = parse_fixed_header(&self.buf[..self.used])? else {
            return Ok(Decoded::Incomplete);
        };

        let frame_len = header.frame_len();
        if frame_len > N {
            // Never fits; drop what we have and discard the rest as it arrives
            self.skip = frame_len - self.used;
            self.used = 0;
            log::warn!("MQTT: skipping oversized {:?} frame ({} bytes)", header.packet_type, frame_len);
            return Ok(Decoded::Skipping);
        }
        if frame_len > self.used {
            return Ok(Decoded::Incomplete);
        }

        let result = on_frame(&header, &self.buf[header.header_len..frame_len]);
        self.buf.copy_within(frame_len..self.used, 0);
        self.used -= frame_len;
        Ok(Decoded::Frame(result))
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn pending_skip(&self) -> usize {
        self.skip
    }

    pub fn reset(&mut self) {
        self.used = 0;
        self.skip = 0;
    }
}

impl<const N: usize> Default for ReceiveBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Outbound frames ────────────────────────────────────────────────────

/// CONNECT payload fields. Empty username / password are omitted.
#[derive(Debug, Clone, Copy)]
pub struct Connect<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

fn write_string(buf: &mut [u8], cursor: &mut usize, s: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::TooLarge)?;
    let end = *cursor + 2 + s.len();
    let slot = buf.get_mut(*cursor..end).ok_or(CodecError::BufferTooSmall)?;
    slot[..2].copy_from_slice(&len.to_be_bytes());
    slot[2..].copy_from_slice(s);
    *cursor = end;
    Ok(())
}

/// Encode a clean-session CONNECT with keepalive 0 into `buf`.
pub fn encode_connect(connect: &Connect<'_>, buf: &mut [u8]) -> Result<usize, CodecError> {
    if buf.len() < MAX_FIXED_HEADER_LEN + 10 {
        return Err(CodecError::BufferTooSmall);
    }

    // Body goes after the widest possible fixed header, then slides down
    let content_start = MAX_FIXED_HEADER_LEN;
    let mut cursor = content_start;
    write_string(buf, &mut cursor, PROTOCOL_NAME)?;
    buf[cursor] = PROTOCOL_LEVEL;
    let flags_pos = cursor + 1;
    buf[flags_pos] = FLAG_CLEAN_SESSION;
    buf[cursor + 2..cursor + 4].copy_from_slice(&0u16.to_be_bytes());
    cursor += 4;

    write_string(buf, &mut cursor, connect.client_id.as_bytes())?;
    if !connect.username.is_empty() {
        buf[flags_pos] |= FLAG_USERNAME;
        write_string(buf, &mut cursor, connect.username.as_bytes())?;
    }
    if !connect.password.is_empty() {
        buf[flags_pos] |= FLAG_PASSWORD;
        write_string(buf, &mut cursor, connect.password.as_bytes())?;
    }

    let remaining = cursor - content_start;
    let mut len_bytes = [0u8; 4];
    let n = encode_remaining_length(remaining, &mut len_bytes)?;
    buf[0] = PacketType::Connect.header_byte();
    buf[1..1 + n].copy_from_slice(&len_bytes[..n]);
    buf.copy_within(content_start..cursor, 1 + n);
    Ok(1 + n + remaining)
}

/// Encode the PUBLISH (QoS 0) fixed header and topic length.
///
/// The caller sends the returned bytes, then the topic, then the payload.
pub fn encode_publish_header(
    topic: &str,
    payload_len: usize,
    buf: &mut [u8; PUBLISH_HEADER_LEN],
) -> Result<usize, CodecError> {
    let topic_len = u16::try_from(topic.len()).map_err(|_| CodecError::TooLarge)?;
    let remaining = 2 + topic.len() + payload_len;
    buf[0] = PacketType::Publish.header_byte();
    let n = encode_remaining_length(remaining, &mut buf[1..MAX_FIXED_HEADER_LEN])?;
    buf[1 + n..3 + n].copy_from_slice(&topic_len.to_be_bytes());
    Ok(3 + n)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Remaining length ──────────────────────────────────────────

    #[test]
    fn remaining_length_round_trip_at_boundaries() {
        for len in [
            0,
            1,
            127,
            128,
            16_383,
            16_384,
            2_097_151,
            2_097_152,
            MAX_REMAINING_LEN,
        ] {
            let mut buf = [0u8; 4];
            let written = encode_remaining_length(len, &mut buf).unwrap();
            assert_eq!(
                decode_remaining_length(&buf[..written]),
                Ok(Some((len, written))),
                "len {len}"
            );
        }
    }

    #[test]
    fn remaining_length_byte_counts() {
        let mut buf = [0u8; 4];
        assert_eq!(encode_remaining_length(127, &mut buf), Ok(1));
        assert_eq!(encode_remaining_length(128, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0x80, 0x01]);
        assert_eq!(encode_remaining_length(321, &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0xC1, 0x02]);
        assert_eq!(encode_remaining_length(MAX_REMAINING_LEN, &mut buf), Ok(4));
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn remaining_length_too_large() {
        let mut buf = [0u8; 8];
        assert_eq!(
            encode_remaining_length(MAX_REMAINING_LEN + 1, &mut buf),
            Err(CodecError::TooLarge)
        );
    }

    #[test]
    fn remaining_length_incomplete_and_malformed() {
        assert_eq!(decode_remaining_length(&[]), Ok(None));
        assert_eq!(decode_remaining_length(&[0x80]), Ok(None));
        assert_eq!(decode_remaining_length(&[0xFF, 0xFF, 0xFF]), Ok(None));
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(CodecError::MalformedLength)
        );
    }

    // ── Fixed header ──────────────────────────────────────────────

    #[test]
    fn header_one_byte_at_a_time_matches_all_at_once() {
        let frame = [0x30, 0xC1, 0x02, 0xAA];
        let whole = parse_fixed_header(&frame).unwrap();
        for end in 0..3 {
            assert_eq!(parse_fixed_header(&frame[..end]), Ok(None), "prefix {end}");
        }
        assert_eq!(parse_fixed_header(&frame[..3]), Ok(whole));
        let header = whole.unwrap();
        assert_eq!(header.packet_type, PacketType::Publish);
        assert_eq!(header.remaining_len, 321);
        assert_eq!(header.header_len, 3);
    }

    // ── ReceiveBuffer ─────────────────────────────────────────────

    fn feed<const N: usize>(rx: &mut ReceiveBuffer<N>, bytes: &[u8]) {
        let spare = rx.spare_mut();
        spare[..bytes.len()].copy_from_slice(bytes);
        rx.commit(bytes.len());
    }

    fn connack_code<const N: usize>(rx: &mut ReceiveBuffer<N>) -> Decoded<(PacketType, usize, u8)> {
        rx.next_frame(|h, body| (h.packet_type, h.remaining_len, body[1]))
            .unwrap()
    }

    #[test]
    fn connack_fed_byte_by_byte() {
        let mut rx = ReceiveBuffer::<16>::new();
        let connack = [0x20, 0x02, 0x00, 0x00];
        for &b in &connack[..3] {
            feed(&mut rx, &[b]);
            assert_eq!(connack_code(&mut rx), Decoded::Incomplete);
        }
        feed(&mut rx, &connack[3..]);
        assert_eq!(
            connack_code(&mut rx),
            Decoded::Frame((PacketType::ConnAck, 2, 0))
        );
        assert!(rx.is_empty());
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut rx = ReceiveBuffer::<16>::new();
        feed(&mut rx, &[0xD0, 0x00, 0x20, 0x02, 0x00, 0x05]);
        assert_eq!(
            rx.next_frame(|h, _| h.packet_type).unwrap(),
            Decoded::Frame(PacketType::PingResp)
        );
        assert_eq!(
            connack_code(&mut rx),
            Decoded::Frame((PacketType::ConnAck, 2, 5))
        );
        assert_eq!(connack_code(&mut rx), Decoded::Incomplete);
    }

    #[test]
    fn oversized_frame_is_skipped_exactly() {
        const N: usize = 16;
        let mut rx = ReceiveBuffer::<N>::new();

        // PUBLISH with 40 body bytes, then a CONNACK
        let mut stream = std::vec![0x30, 40];
        stream.extend((0..40).map(|i| i as u8));
        stream.extend_from_slice(&[0x20, 0x02, 0x00, 0x00]);

        let mut frames = std::vec::Vec::new();
        let mut skipped = false;
        for chunk in stream.chunks(7) {
            feed(&mut rx, chunk);
            loop {
                match rx.next_frame(|h, body| (h.packet_type, body.len())).unwrap() {
                    Decoded::Incomplete => break,
                    Decoded::Skipping => skipped = true,
                    Decoded::Frame(f) => frames.push(f),
                }
            }
        }

        assert!(skipped);
        assert_eq!(frames, [(PacketType::ConnAck, 2)]);
        assert!(rx.is_empty());
        assert_eq!(rx.pending_skip(), 0);
    }

    #[test]
    fn skip_spanning_several_reads() {
        let mut rx = ReceiveBuffer::<8>::new();
        feed(&mut rx, &[0x30, 20, 1, 2]);
        assert_eq!(rx.next_frame(|_, _| ()).unwrap(), Decoded::Skipping);
        // 22 byte frame, 4 already seen
        assert_eq!(rx.pending_skip(), 18);
        feed(&mut rx, &[0; 8]);
        assert_eq!(rx.pending_skip(), 10);
        feed(&mut rx, &[0; 8]);
        assert_eq!(rx.pending_skip(), 2);
        // Tail of skipped frame plus the start of the next one
        feed(&mut rx, &[0, 0, 0xD0, 0x00]);
        assert_eq!(rx.pending_skip(), 0);
        assert_eq!(
            rx.next_frame(|h, _| h.packet_type).unwrap(),
            Decoded::Frame(PacketType::PingResp)
        );
    }

    #[test]
    fn frame_exactly_buffer_size_is_kept() {
        let mut rx = ReceiveBuffer::<8>::new();
        feed(&mut rx, &[0x30, 6, 0, 1, b't', 1, 2, 3]);
        assert_eq!(
            rx.next_frame(|_, body| body.len()).unwrap(),
            Decoded::Frame(6)
        );
    }

    // ── Outbound ──────────────────────────────────────────────────

    #[test]
    fn connect_without_credentials() {
        let mut buf = [0u8; CONNECT_BUF_LEN];
        let connect = Connect {
            client_id: "bubble",
            username: "",
            password: "",
        };
        let len = encode_connect(&connect, &mut buf).unwrap();
        assert_eq!(
            &buf[..len],
            &[
                0x10, 18, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x00, // variable header
                0x00, 0x06, b'b', b'u', b'b', b'b', b'l', b'e',
            ]
        );
    }

    #[test]
    fn connect_with_credentials_sets_flags() {
        let mut buf = [0u8; CONNECT_BUF_LEN];
        let connect = Connect {
            client_id: "id",
            username: "user",
            password: "pw",
        };
        let len = encode_connect(&connect, &mut buf).unwrap();
        assert_eq!(buf[0], 0x10);
        assert_eq!(buf[1] as usize, len - 2);
        assert_eq!(buf[9], 0x02 | 0x80 | 0x40);
        assert_eq!(&buf[12..16], &[0x00, 0x02, b'i', b'd']);
        assert_eq!(&buf[16..22], &[0x00, 0x04, b'u', b's', b'e', b'r']);
        assert_eq!(&buf[22..26], &[0x00, 0x02, b'p', b'w']);
        assert_eq!(len, 26);
    }

    #[test]
    fn connect_password_only() {
        let mut buf = [0u8; CONNECT_BUF_LEN];
        let connect = Connect {
            client_id: "id",
            username: "",
            password: "pw",
        };
        encode_connect(&connect, &mut buf).unwrap();
        assert_eq!(buf[9], 0x02 | 0x40);
    }

    #[test]
    fn publish_header_layout() {
        let mut buf = [0u8; PUBLISH_HEADER_LEN];
        let n = encode_publish_header("a/b", 200, &mut buf).unwrap();
        // remaining = 2 + 3 + 200 = 205 -> 0xCD 0x01
        assert_eq!(&buf[..n], &[0x30, 0xCD, 0x01, 0x00, 0x03]);
    }
}
