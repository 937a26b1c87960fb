//! Wi-Fi bring-up and the TCP/TLS transports behind the library's
//! `Transport` and `Connector` capabilities.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use anyhow::anyhow;
use bubblebridge::config::{Config, ConfigKey};
use bubblebridge::transport::{Connector, Transport, TransportError};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{
    esp, esp_crt_bundle_attach, esp_tls_cfg_t, esp_tls_conn_destroy, esp_tls_conn_new_sync,
    esp_tls_conn_read, esp_tls_conn_write, esp_tls_get_bytes_avail, esp_tls_get_conn_sockfd,
    esp_tls_init, esp_tls_t, lwip_recv, EspError, ESP_ERR_NO_MEM, ESP_FAIL, MSG_DONTWAIT, MSG_PEEK,
};
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
    EspWifi,
};

/// SSID of the access point opened when no network is configured
pub const AP_SSID: &str = "bubblebridge";

// ── Wi-Fi ────────────────────────────────────────────────────────────

/// Join the configured network, or open the setup access point when no
/// SSID is stored. A failed join is logged and retried by [`keep_connected`].
pub fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    config: &Config,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sys_loop.clone(), Some(nvs))?, sys_loop)?;

    let ssid = config.get_str(ConfigKey::WifiSsid);
    if ssid.is_empty() {
        wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
            ssid: AP_SSID.try_into().map_err(|_| anyhow!("AP SSID too long"))?,
            auth_method: AuthMethod::None,
            max_connections: 4,
            ..Default::default()
        }))?;
        wifi.start()?;
        wifi.wait_netif_up()?;
        log::info!("WiFi: access point '{}' up", AP_SSID);
        return Ok(wifi);
    }

    let hostname = config.get_str(ConfigKey::Hostname);
    if !hostname.is_empty() {
        wifi.wifi_mut().sta_netif_mut().set_hostname(hostname)?;
    }

    let password = config.get_str(ConfigKey::WifiPass);
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("SSID too long"))?,
        password: password.try_into().map_err(|_| anyhow!("WiFi password too long"))?,
        auth_method: if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    }))?;
    wifi.start()?;
    if let Err(e) = join(&mut wifi) {
        log::warn!("WiFi: joining '{}' failed: {}", ssid, e);
    }
    Ok(wifi)
}

fn join(wifi: &mut BlockingWifi<EspWifi<'static>>) -> Result<(), EspError> {
    wifi.connect()?;
    wifi.wait_netif_up()?;
    let ip = wifi.wifi().sta_netif().get_ip_info()?;
    log::info!("WiFi: connected, address {}", ip.ip);
    Ok(())
}

/// Rejoin the network after a drop. Called periodically from the main thread.
pub fn keep_connected(wifi: &mut BlockingWifi<EspWifi<'static>>) {
    if matches!(wifi.get_configuration(), Ok(Configuration::AccessPoint(_))) {
        return;
    }
    if wifi.is_connected().unwrap_or(false) {
        return;
    }
    log::warn!("WiFi: link down, reconnecting");
    if let Err(e) = join(wifi) {
        log::warn!("WiFi: reconnect failed: {}", e);
    }
}

// ── Transports ───────────────────────────────────────────────────────

/// Bound on the TLS handshake, including the TCP connect
const TLS_CONNECT_TIMEOUT_MS: i32 = 10_000;

fn io_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock => TransportError::WouldBlock,
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Closed,
        _ => TransportError::Io,
    }
}

/// Plain TCP stream, used by the MQTT client and the HTTP server.
///
/// On a blocking socket with a read timeout lwIP reports an expired wait
/// as would-block; that is surfaced as a closed peer so callers that
/// retry on would-block do not spin on a silent client.
pub struct TcpTransport {
    stream: TcpStream,
    nonblocking: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            nonblocking: false,
        }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.stream.write(buf).map_err(io_error)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if !self.nonblocking && e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("TCP: read timed out");
                Err(TransportError::Closed)
            }
            Err(e) => Err(io_error(e)),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError> {
        self.stream.set_nonblocking(nonblocking).map_err(io_error)?;
        self.nonblocking = nonblocking;
        Ok(())
    }
}

/// TLS session over an ESP-TLS managed socket, verified against the
/// certificate bundle.
///
/// ESP-TLS reads always block, so in non-blocking mode a read only goes
/// through when decrypted bytes are buffered or the socket has data
/// queued, and reports would-block otherwise. A partly received record
/// can still hold the read until the rest of it arrives.
pub struct TlsTransport {
    tls: *mut esp_tls_t,
    nonblocking: bool,
}

impl TlsTransport {
    pub fn connect(host: &str, port: u16) -> Result<Self, EspError> {
        let tls = unsafe { esp_tls_init() };
        if tls.is_null() {
            return Err(EspError::from_infallible::<ESP_ERR_NO_MEM>());
        }
        // Released by Drop if the handshake fails
        let transport = Self {
            tls,
            nonblocking: false,
        };

        let cfg = esp_tls_cfg_t {
            crt_bundle_attach: Some(esp_crt_bundle_attach),
            timeout_ms: TLS_CONNECT_TIMEOUT_MS,
            ..Default::default()
        };
        let ret = unsafe {
            esp_tls_conn_new_sync(
                host.as_ptr().cast(),
                host.len() as i32,
                port as i32,
                &cfg,
                transport.tls,
            )
        };
        if ret != 1 {
            return Err(EspError::from_infallible::<ESP_FAIL>());
        }
        Ok(transport)
    }

    /// Whether a read can make progress without waiting for the peer.
    fn readable(&mut self) -> Result<bool, TransportError> {
        if unsafe { esp_tls_get_bytes_avail(self.tls) } > 0 {
            return Ok(true);
        }

        let mut fd: i32 = -1;
        esp!(unsafe { esp_tls_get_conn_sockfd(self.tls, &mut fd) }).map_err(tls_error)?;
        let mut byte = 0u8;
        let n = unsafe {
            lwip_recv(
                fd,
                (&mut byte as *mut u8).cast(),
                1,
                (MSG_PEEK | MSG_DONTWAIT) as i32,
            )
        };
        match n {
            0 => Err(TransportError::Closed),
            n if n > 0 => Ok(true),
            _ => match io_error(io::Error::last_os_error()) {
                TransportError::WouldBlock => Ok(false),
                e => Err(e),
            },
        }
    }
}

impl Drop for TlsTransport {
    fn drop(&mut self) {
        unsafe { esp_tls_conn_destroy(self.tls) };
    }
}

fn tls_error(e: EspError) -> TransportError {
    log::debug!("TLS: {}", e);
    TransportError::Io
}

fn tls_status(ret: isize) -> Result<usize, TransportError> {
    if ret < 0 {
        log::debug!("TLS: error -0x{:x}", -ret);
        Err(TransportError::Io)
    } else {
        Ok(ret as usize)
    }
}

impl Transport for TlsTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        tls_status(unsafe { esp_tls_conn_write(self.tls, buf.as_ptr().cast(), buf.len()) })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.nonblocking && !self.readable()? {
            return Err(TransportError::WouldBlock);
        }
        tls_status(unsafe { esp_tls_conn_read(self.tls, buf.as_mut_ptr().cast(), buf.len()) })
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError> {
        self.nonblocking = nonblocking;
        Ok(())
    }
}

pub enum NetTransport {
    Tcp(TcpTransport),
    Tls(TlsTransport),
}

impl Transport for NetTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        match self {
            NetTransport::Tcp(t) => t.write(buf),
            NetTransport::Tls(t) => t.write(buf),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self {
            NetTransport::Tcp(t) => t.read(buf),
            NetTransport::Tls(t) => t.read(buf),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), TransportError> {
        match self {
            NetTransport::Tcp(t) => t.set_nonblocking(nonblocking),
            NetTransport::Tls(t) => t.set_nonblocking(nonblocking),
        }
    }
}

/// Opens broker connections through the lwIP socket layer.
pub struct EspConnector;

impl Connector for EspConnector {
    type Transport = NetTransport;

    fn connect(&mut self, host: &str, port: u16, tls: bool) -> Result<NetTransport, TransportError> {
        if host.is_empty() {
            return Err(TransportError::ConnectFailed);
        }
        if tls {
            TlsTransport::connect(host, port)
                .map(NetTransport::Tls)
                .map_err(|e| {
                    log::warn!("TLS: connect to {}:{} failed: {}", host, port, e);
                    TransportError::ConnectFailed
                })
        } else {
            TcpStream::connect((host, port))
                .map(|s| NetTransport::Tcp(TcpTransport::new(s)))
                .map_err(|e| {
                    log::warn!("TCP: connect to {}:{} failed: {}", host, port, e);
                    TransportError::ConnectFailed
                })
        }
    }
}
