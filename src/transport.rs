//! Byte-stream transport abstraction shared by the MQTT client and HTTP server.
//!
//! Platforms provide TCP (optionally TLS-wrapped) streams behind these traits
//! so the protocol code stays host-testable.

/// Transport failure, with "would block" kept distinct from hard errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Non-blocking operation has no data / no room right now
    WouldBlock,
    /// Peer closed the connection
    Closed,
    /// Host name could not be resolved or connection refused
    ConnectFailed,
    /// Any other I/O failure
    Io,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::WouldBlock => f.write_str("operation would block"),
            TransportError::Closed => f.write_str("connection closed"),
            TransportError::ConnectFailed => f.write_str("connect failed"),
            TransportError::Io => f.write_str("I/O error"),
        }
    }
}

/// A connected, connection-oriented byte stream.
pub trait Transport {
    /// Write some bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read into `buf`. `Ok(0)` means the peer closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Switch between blocking and non-blocking reads.
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError>;

    /// Write the whole buffer, retrying would-block conditions.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), TransportError> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => buf = &buf[n..],
                Err(TransportError::WouldBlock) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Opens transports to a remote host.
pub trait Connector {
    type Transport: Transport;

    fn connect(&mut self, host: &str, port: u16, tls: bool) -> Result<Self::Transport, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        (**self).write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError> {
        (**self).set_nonblocking(nonblocking)
    }
}
