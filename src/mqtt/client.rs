//! # MQTT Client
//!
//! Blocking publish-only client: connect handshake, QoS 0 publish and
//! inbound frame handling over a [`Transport`]. Any transport error other
//! than would-block, or any protocol violation, drops the connection; the
//! next `connect()` starts over.

use embedded_hal::delay::DelayNs;
use heapless::String;

use super::codec::{
    encode_connect, encode_publish_header, CodecError, Connect, Decoded, FixedHeader, PacketType,
    ReceiveBuffer, CONNECT_BUF_LEN, MAX_FIELD_LEN, PUBLISH_HEADER_LEN,
};
use crate::config::{Config, ConfigKey};
use crate::transport::{Connector, Transport, TransportError};

/// Pause after a failed connect, so callers retrying in a loop back off.
pub const CONNECT_RETRY_DELAY_MS: u32 = 5000;

pub const DEFAULT_PORT: u16 = 1883;

pub type FieldString = String<MAX_FIELD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport being opened and CONNECT sent
    Connecting,
    /// CONNECT sent, waiting for CONNACK
    AwaitingAck,
    Connected,
}

/// CONNACK return codes (MQTT 3.1.1 §3.2.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    Other(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttError {
    Transport(TransportError),
    Codec(CodecError),
    /// Broker answered CONNECT with a non-zero return code
    ConnectionRefused(ConnectReturnCode),
    /// CONNACK with a bad length, or a second CONNACK
    UnexpectedConnAck,
    NotConnected,
}

impl From<TransportError> for MqttError {
    fn from(err: TransportError) -> Self {
        MqttError::Transport(err)
    }
}

impl From<CodecError> for MqttError {
    fn from(err: CodecError) -> Self {
        MqttError::Codec(err)
    }
}

impl core::fmt::Display for MqttError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MqttError::Transport(e) => write!(f, "transport: {}", e),
            MqttError::Codec(e) => write!(f, "codec: {}", e),
            MqttError::ConnectionRefused(code) => write!(f, "connection refused: {:?}", code),
            MqttError::UnexpectedConnAck => f.write_str("unexpected CONNACK"),
            MqttError::NotConnected => f.write_str("not connected"),
        }
    }
}

/// Broker address and credentials, copied out of the config store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MqttOptions {
    pub host: FieldString,
    pub port: u16,
    pub tls: bool,
    pub client_id: FieldString,
    pub username: FieldString,
    pub password: FieldString,
}

impl MqttOptions {
    /// Hostname doubles as the client identifier.
    pub fn from_config(config: &Config) -> Self {
        let field = |key| FieldString::try_from(config.get_str(key)).unwrap_or_default();
        let port = u16::try_from(config.get_int(ConfigKey::MqttPort)).unwrap_or(DEFAULT_PORT);
        Self {
            host: field(ConfigKey::MqttHost),
            port,
            tls: config.get_int(ConfigKey::MqttTls) != 0,
            client_id: field(ConfigKey::Hostname),
            username: field(ConfigKey::MqttUser),
            password: field(ConfigKey::MqttPass),
        }
    }
}

/// Something that can deliver a message to the broker, connecting on demand.
pub trait MessageSink {
    fn send(&mut self, topic: &str, payload: &[u8]) -> bool;
}

enum Inbound {
    Accepted,
    Ignored,
}

/// Classify one inbound frame. Only CONNACK carries meaning for a publisher.
fn check_frame(header: &FixedHeader, body: &[u8], connack_received: bool) -> Result<Inbound, MqttError> {
    match header.packet_type {
        PacketType::ConnAck => {
            if connack_received || header.remaining_len != 2 {
                return Err(MqttError::UnexpectedConnAck);
            }
            match ConnectReturnCode::from(body[1]) {
                ConnectReturnCode::Accepted => Ok(Inbound::Accepted),
                code => Err(MqttError::ConnectionRefused(code)),
            }
        }
        _ => Ok(Inbound::Ignored),
    }
}

pub struct MqttClient<C: Connector, D: DelayNs> {
    connector: C,
    delay: D,
    options: MqttOptions,
    transport: Option<C::Transport>,
    state: ConnectionState,
    connack_received: bool,
    last_error: Option<MqttError>,
    rx: ReceiveBuffer,
}

impl<C: Connector, D: DelayNs> MqttClient<C, D> {
    pub fn new(connector: C, delay: D, options: MqttOptions) -> Self {
        Self {
            connector,
            delay,
            options,
            transport: None,
            state: ConnectionState::Disconnected,
            connack_received: false,
            last_error: None,
            rx: ReceiveBuffer::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    /// Why the connection was last dropped, if it ever was.
    pub fn last_error(&self) -> Option<MqttError> {
        self.last_error
    }

    /// Open the transport and complete the CONNECT / CONNACK handshake.
    ///
    /// Blocks until the broker acknowledges or the connection fails. A
    /// failure waits [`CONNECT_RETRY_DELAY_MS`] before returning `false`.
    pub fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        match self.handshake() {
            Ok(()) => {
                log::info!(
                    "MQTT: connected to {}:{} as '{}'",
                    self.options.host,
                    self.options.port,
                    self.options.client_id
                );
                true
            }
            Err(e) => {
                log::warn!(
                    "MQTT: connect to {}:{} failed: {}",
                    self.options.host,
                    self.options.port,
                    e
                );
                self.delay.delay_ms(CONNECT_RETRY_DELAY_MS);
                self.disconnect();
                false
            }
        }
    }

    fn handshake(&mut self) -> Result<(), MqttError> {
        self.disconnect();
        self.last_error = None;
        self.state = ConnectionState::Connecting;

        let transport = self
            .connector
            .connect(&self.options.host, self.options.port, self.options.tls)
            .map_err(|e| self.record(e.into()))?;
        self.transport = Some(transport);

        let mut frame = [0u8; CONNECT_BUF_LEN];
        let connect = Connect {
            client_id: &self.options.client_id,
            username: &self.options.username,
            password: &self.options.password,
        };
        let len = encode_connect(&connect, &mut frame).map_err(|e| self.record(e.into()))?;
        self.write_all(&[&frame[..len]])?;

        self.state = ConnectionState::AwaitingAck;
        while self.state == ConnectionState::AwaitingAck {
            self.poll_incoming(true);
        }

        if self.is_connected() {
            Ok(())
        } else {
            Err(self.last_error.unwrap_or(MqttError::NotConnected))
        }
    }

    /// Send a QoS 0 PUBLISH. Pending inbound bytes are drained first.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        self.poll_incoming(false);
        if !self.is_connected() {
            return false;
        }

        let mut header = [0u8; PUBLISH_HEADER_LEN];
        let n = match encode_publish_header(topic, payload.len(), &mut header) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("MQTT: cannot publish to {}: {}", topic, e);
                return false;
            }
        };

        match self.write_all(&[&header[..n], topic.as_bytes(), payload]) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("MQTT: publish to {} failed: {}", topic, e);
                false
            }
        }
    }

    /// Release the transport and reset all protocol state. Idempotent.
    pub fn disconnect(&mut self) -> bool {
        if self.transport.take().is_some() {
            log::info!("MQTT: disconnected");
        }
        self.state = ConnectionState::Disconnected;
        self.connack_received = false;
        self.rx.reset();
        true
    }

    /// Read and handle inbound frames.
    ///
    /// With `block`, waits for at least one frame, then keeps draining
    /// without blocking; otherwise only consumes bytes already available.
    pub fn poll_incoming(&mut self, block: bool) {
        let mut block = block;
        if let Err(e) = self.set_blocking(block) {
            self.fail(e);
            return;
        }

        loop {
            let Some(transport) = self.transport.as_mut() else {
                return;
            };

            match transport.read(self.rx.spare_mut()) {
                Ok(0) => {
                    self.fail(TransportError::Closed.into());
                    return;
                }
                Ok(n) => {
                    self.rx.commit(n);
                    match self.process_frames() {
                        Ok(true) if block => {
                            block = false;
                            if let Err(e) = self.set_blocking(false) {
                                self.fail(e);
                                return;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.fail(e);
                            return;
                        }
                    }
                }
                Err(TransportError::WouldBlock) if block => {}
                Err(TransportError::WouldBlock) => return,
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            }
        }
    }

    /// Consume every complete frame in the receive buffer. Returns whether
    /// any progress was made.
    fn process_frames(&mut self) -> Result<bool, MqttError> {
        let mut progressed = false;
        loop {
            let connack_received = self.connack_received;
            match self
                .rx
                .next_frame(|header, body| check_frame(header, body, connack_received))?
            {
                Decoded::Incomplete => return Ok(progressed),
                Decoded::Skipping => progressed = true,
                Decoded::Frame(inbound) => {
                    progressed = true;
                    if let Inbound::Accepted = inbound? {
                        self.connack_received = true;
                        self.state = ConnectionState::Connected;
                    }
                }
            }
        }
    }

    fn set_blocking(&mut self, block: bool) -> Result<(), MqttError> {
        match self.transport.as_mut() {
            Some(t) => Ok(t.set_nonblocking(!block)?),
            None => Ok(()),
        }
    }

    /// Write each part in order; any failure drops the connection.
    fn write_all(&mut self, parts: &[&[u8]]) -> Result<(), MqttError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(MqttError::NotConnected);
        };
        for part in parts {
            if let Err(e) = transport.write_all(part) {
                self.fail(e.into());
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: MqttError) {
        log::warn!("MQTT: dropping connection: {}", err);
        self.record(err);
        self.disconnect();
    }

    fn record(&mut self, err: MqttError) -> MqttError {
        self.last_error = Some(err);
        err
    }
}

impl<C: Connector, D: DelayNs> MessageSink for MqttClient<C, D> {
    fn send(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.connect() {
            return false;
        }
        if self.publish(topic, payload) {
            true
        } else {
            self.disconnect();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;

    // ── Test doubles ──────────────────────────────────────────────

    #[derive(Default)]
    struct Wire {
        reads: VecDeque<Result<Vec<u8>, TransportError>>,
        written: Vec<u8>,
        nonblocking: bool,
        fail_writes: bool,
        dropped: usize,
    }

    struct MockTransport(Rc<RefCell<Wire>>);

    impl Transport for MockTransport {
        fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
            let mut w = self.0.borrow_mut();
            if w.fail_writes {
                return Err(TransportError::Io);
            }
            w.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let mut w = self.0.borrow_mut();
            match w.reads.pop_front() {
                Some(Ok(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        let rest = bytes.split_off(n);
                        w.reads.push_front(Ok(rest));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None if w.nonblocking => Err(TransportError::WouldBlock),
                None => Ok(0),
            }
        }

        fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError> {
            self.0.borrow_mut().nonblocking = nonblocking;
            Ok(())
        }
    }

    impl Drop for MockTransport {
        fn drop(&mut self) {
            self.0.borrow_mut().dropped += 1;
        }
    }

    struct MockConnector {
        wire: Rc<RefCell<Wire>>,
        refuse: bool,
        connects: usize,
    }

    impl Connector for MockConnector {
        type Transport = MockTransport;

        fn connect(&mut self, _host: &str, _port: u16, _tls: bool) -> Result<MockTransport, TransportError> {
            self.connects += 1;
            if self.refuse {
                Err(TransportError::ConnectFailed)
            } else {
                Ok(MockTransport(self.wire.clone()))
            }
        }
    }

    #[derive(Default)]
    struct MockDelay {
        total_ns: u64,
    }

    impl DelayNs for MockDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += ns as u64;
        }
    }

    const CONNACK_OK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn options() -> MqttOptions {
        MqttOptions {
            host: FieldString::try_from("broker.local").unwrap(),
            port: 1883,
            tls: false,
            client_id: FieldString::try_from("bubble-1").unwrap(),
            ..Default::default()
        }
    }

    fn client(refuse: bool) -> (MqttClient<MockConnector, MockDelay>, Rc<RefCell<Wire>>) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let connector = MockConnector {
            wire: wire.clone(),
            refuse,
            connects: 0,
        };
        (MqttClient::new(connector, MockDelay::default(), options()), wire)
    }

    fn script(wire: &Rc<RefCell<Wire>>, bytes: &[u8]) {
        wire.borrow_mut().reads.push_back(Ok(bytes.to_vec()));
    }

    fn retry_delay_ns() -> u64 {
        CONNECT_RETRY_DELAY_MS as u64 * 1_000_000
    }

    // ── Connect ───────────────────────────────────────────────────

    #[test]
    fn connect_handshake_succeeds() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        assert_eq!(c.state(), ConnectionState::Connected);
        let w = wire.borrow();
        assert_eq!(w.written[0], 0x10);
        assert!(w.written.ends_with(b"\x00\x08bubble-1"));
        assert_eq!(c.delay.total_ns, 0);
    }

    #[test]
    fn connect_when_connected_is_noop() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        assert!(c.connect());
        assert_eq!(c.connector.connects, 1);
    }

    #[test]
    fn connack_split_across_reads() {
        let (mut c, wire) = client(false);
        for b in CONNACK_OK {
            script(&wire, &[b]);
        }
        assert!(c.connect());
    }

    #[test]
    fn refused_connack_disconnects_and_backs_off() {
        let (mut c, wire) = client(false);
        script(&wire, &[0x20, 0x02, 0x00, 0x05]);
        assert!(!c.connect());
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.delay.total_ns, retry_delay_ns());
        assert_eq!(wire.borrow().dropped, 1);
    }

    #[test]
    fn refused_connack_reports_return_code() {
        let (mut c, wire) = client(false);
        script(&wire, &[0x20, 0x02, 0x00, 0x05]);
        assert_eq!(
            c.handshake(),
            Err(MqttError::ConnectionRefused(ConnectReturnCode::NotAuthorized))
        );
        assert_eq!(
            c.last_error(),
            Some(MqttError::ConnectionRefused(ConnectReturnCode::NotAuthorized))
        );
    }

    #[test]
    fn handshake_reports_transport_cause() {
        let (mut c, _wire) = client(true);
        assert_eq!(
            c.handshake(),
            Err(MqttError::Transport(TransportError::ConnectFailed))
        );

        let (mut c, wire) = client(false);
        assert_eq!(c.handshake(), Err(MqttError::Transport(TransportError::Closed)));
        assert_eq!(wire.borrow().dropped, 1);
    }

    #[test]
    fn successful_connect_clears_previous_error() {
        let (mut c, wire) = client(false);
        script(&wire, &[0x20, 0x02, 0x00, 0x04]);
        assert!(!c.connect());
        assert!(c.last_error().is_some());
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        assert_eq!(c.last_error(), None);
    }

    #[test]
    fn connack_with_wrong_length_rejected() {
        let (mut c, wire) = client(false);
        script(&wire, &[0x20, 0x03, 0x00, 0x00, 0x00]);
        assert!(!c.connect());
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connector_failure_backs_off() {
        let (mut c, _wire) = client(true);
        assert!(!c.connect());
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.delay.total_ns, retry_delay_ns());
    }

    #[test]
    fn peer_close_during_handshake() {
        let (mut c, wire) = client(false);
        // No scripted reads: blocking read reports end of stream
        assert!(!c.connect());
        assert_eq!(wire.borrow().dropped, 1);
    }

    #[test]
    fn other_frames_before_connack_are_ignored() {
        let (mut c, wire) = client(false);
        script(&wire, &[0xD0, 0x00]);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
    }

    // ── Publish ───────────────────────────────────────────────────

    #[test]
    fn publish_writes_frame() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        wire.borrow_mut().written.clear();

        assert!(c.publish("t/x", b"hi"));
        assert_eq!(
            wire.borrow().written,
            [0x30, 0x07, 0x00, 0x03, b't', b'/', b'x', b'h', b'i']
        );
    }

    #[test]
    fn publish_when_disconnected_fails() {
        let (mut c, wire) = client(false);
        assert!(!c.publish("t", b"x"));
        assert!(wire.borrow().written.is_empty());
    }

    #[test]
    fn publish_write_error_disconnects() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        wire.borrow_mut().fail_writes = true;
        assert!(!c.publish("t", b"x"));
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(wire.borrow().dropped, 1);
    }

    #[test]
    fn duplicate_connack_drains_to_disconnect() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        script(&wire, &CONNACK_OK);
        assert!(!c.publish("t", b"x"));
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn oversized_inbound_frame_is_discarded() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());

        // 600-byte PUBLISH from the broker, bigger than the receive buffer
        let mut big = std::vec![0x30, 0xD8, 0x04];
        big.resize(3 + 600, 0xEE);
        script(&wire, &big);

        assert!(c.publish("t", b"x"));
        assert!(c.is_connected());
        assert!(c.rx.is_empty());
        assert_eq!(c.rx.pending_skip(), 0);
    }

    #[test]
    fn hard_read_error_disconnects() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        wire.borrow_mut().reads.push_back(Err(TransportError::Io));
        c.poll_incoming(false);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    // ── Disconnect ────────────────────────────────────────────────

    #[test]
    fn disconnect_is_idempotent_and_releases_once() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.connect());
        assert!(c.disconnect());
        assert!(c.disconnect());
        assert_eq!(wire.borrow().dropped, 1);
        assert_eq!(c.state(), ConnectionState::Disconnected);
    }

    // ── MessageSink ───────────────────────────────────────────────

    #[test]
    fn send_connects_lazily() {
        let (mut c, wire) = client(false);
        script(&wire, &CONNACK_OK);
        assert!(c.send("t", b"x"));
        assert_eq!(c.connector.connects, 1);
        assert!(c.send("t", b"y"));
        assert_eq!(c.connector.connects, 1);
    }

    #[test]
    fn send_fails_without_broker() {
        let (mut c, _wire) = client(true);
        assert!(!c.send("t", b"x"));
    }

    // ── Options ───────────────────────────────────────────────────

    #[test]
    fn options_from_config() {
        let mut config = Config::new();
        config.set_str(ConfigKey::Hostname, "office");
        config.set_str(ConfigKey::MqttHost, "10.0.0.2");
        config.set_int(ConfigKey::MqttTls, 1);
        config.set_str(ConfigKey::MqttUser, "u");
        let opts = MqttOptions::from_config(&config);
        assert_eq!(opts.host.as_str(), "10.0.0.2");
        assert_eq!(opts.port, DEFAULT_PORT);
        assert!(opts.tls);
        assert_eq!(opts.client_id.as_str(), "office");
        assert_eq!(opts.username.as_str(), "u");
        assert!(opts.password.is_empty());
    }
}
