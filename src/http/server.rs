//! Routes and handlers for the configuration UI.
//!
//! Every response carries `Connection: close`; the connection is dropped as
//! soon as the handler finishes. Saving the configuration asks the caller to
//! restart, after the confirmation has gone out.
use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use super::parser::Method;
use super::request::RequestContext;
use crate::config::{sanitize_hostname, BootMode, Config, ConfigKey, ConfigStorage};
use crate::ota::UpdateChecker;
use crate::protocol::{self, ConfigView, DownloadResponse, UpdateCheckResponse};
use crate::transport::{Transport, TransportError};

pub static INDEX_HTML: &[u8] = include_bytes!("../../resources/index.html");
pub static FAVICON_PNG: &[u8] = include_bytes!("../../resources/favicon.png");

const APPLIED: &[u8] = b"Configuration applied!  Rebooting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    GetConfig,
    PostConfig,
    Favicon,
    UpdateCheck,
    DownloadUpdate,
    NotFound,
}

const ROUTES: &[(&str, Method, Route)] = &[
    ("/", Method::Get, Route::Index),
    ("/config", Method::Get, Route::GetConfig),
    ("/config", Method::Post, Route::PostConfig),
    ("/favicon.ico", Method::Get, Route::Favicon),
    ("/updatecheck", Method::Get, Route::UpdateCheck),
    ("/downloadupdate", Method::Get, Route::DownloadUpdate),
];

impl Route {
    pub fn resolve(method: Method, path: &str) -> Route {
        ROUTES
            .iter()
            .find(|(p, m, _)| *p == path && *m == method)
            .map_or(Route::NotFound, |&(_, _, route)| route)
    }
}

/// What the caller should do once a connection has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Closed,
    /// Configuration was saved; restart to apply it
    Restart,
}

pub struct HttpServer<U> {
    ctx: RequestContext,
    updater: U,
}

impl<U: UpdateChecker> HttpServer<U> {
    pub fn new(updater: U) -> Self {
        Self {
            ctx: RequestContext::new(),
            updater,
        }
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    /// Serve one request on `stream`, which is closed (dropped) before
    /// this returns.
    pub fn handle_connection<T: Transport, S: ConfigStorage>(
        &mut self,
        mut stream: T,
        config: &mut Config,
        storage: &mut S,
    ) -> Outcome {
        self.ctx.reset();
        if !self.ctx.read_headers(&mut stream) {
            log::debug!("HTTP: connection dropped before headers completed");
            return Outcome::Closed;
        }

        let method = self.ctx.method().unwrap_or(Method::Other);
        let route = Route::resolve(method, self.ctx.path());
        log::info!("HTTP: {} {} -> {:?}", method, self.ctx.path(), route);

        let result = match route {
            Route::Index => respond(&mut stream, "200 OK", "text/html", INDEX_HTML),
            Route::Favicon => respond(&mut stream, "200 OK", "image/png", FAVICON_PNG),
            Route::GetConfig => respond_json(&mut stream, &ConfigView::new(config)),
            Route::UpdateCheck => {
                let update_available = self.updater.refresh();
                respond_json(&mut stream, &UpdateCheckResponse { update_available })
            }
            Route::PostConfig => return self.post_config(stream, config, storage),
            Route::DownloadUpdate => return self.download_update(stream, config, storage),
            Route::NotFound => respond(&mut stream, "404 Not Found", "text/plain", b"Not Found"),
        };
        if let Err(e) = result {
            log::warn!("HTTP: writing response failed: {}", e);
        }
        Outcome::Closed
    }

    fn post_config<T: Transport, S: ConfigStorage>(
        &mut self,
        mut stream: T,
        config: &mut Config,
        storage: &mut S,
    ) -> Outcome {
        if !self.ctx.read_body(&mut stream) {
            log::warn!("HTTP: configuration form incomplete, ignoring");
            return Outcome::Closed;
        }

        if let Err(e) = respond(&mut stream, "200 OK", "text/html", APPLIED) {
            log::warn!("HTTP: writing response failed: {}", e);
        }
        drop(stream);

        apply_form(config, self.ctx.args());
        if let Err(e) = config.save(storage) {
            log::error!("HTTP: saving configuration failed: {}", e);
        }
        log::info!("HTTP: configuration applied");
        Outcome::Restart
    }

    fn download_update<T: Transport, S: ConfigStorage>(
        &mut self,
        mut stream: T,
        config: &mut Config,
        storage: &mut S,
    ) -> Outcome {
        let downloading = self.updater.is_update_available();
        if let Err(e) = respond_json(&mut stream, &DownloadResponse { downloading }) {
            log::warn!("HTTP: writing response failed: {}", e);
        }
        drop(stream);

        if downloading {
            let err = self.updater.download_and_apply(config, storage);
            log::error!("OTA: update failed: {}", err);
        }
        Outcome::Closed
    }
}

/// Apply a submitted configuration form.
///
/// `mqtt_tls` is a checkbox, so it is cleared first and set only when
/// present. Empty password fields keep the stored secret. The next boot
/// goes to Normal mode.
pub fn apply_form<'a>(config: &mut Config, fields: impl Iterator<Item = (&'a str, &'a str)>) {
    config.set_int(ConfigKey::MqttTls, 0);

    for (name, value) in fields {
        let Some(key) = ConfigKey::lookup(name) else {
            log::debug!("HTTP: ignoring form field {}", name);
            continue;
        };
        match key {
            ConfigKey::Hostname | ConfigKey::MqttHost => {
                config.set_str(key, &sanitize_hostname(value));
            }
            ConfigKey::WifiSsid | ConfigKey::MqttUser => {
                config.set_str(key, value);
            }
            ConfigKey::WifiPass | ConfigKey::MqttPass => {
                if !value.is_empty() {
                    config.set_str(key, value);
                }
            }
            ConfigKey::MqttPort => {
                config.set_int(key, parse_int(value));
            }
            ConfigKey::MqttTls => {
                config.set_int(key, 1);
            }
            _ => {}
        }
    }

    config.set_boot_mode(BootMode::Normal);
}

/// Leading decimal integer, `0` if there is none.
fn parse_int(value: &str) -> i32 {
    let s = value.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let n = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i32, |n, b| n.saturating_mul(10).saturating_add(i32::from(b - b'0')));
    if negative {
        -n
    } else {
        n
    }
}

fn respond<T: Transport>(
    stream: &mut T,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> Result<(), TransportError> {
    let mut head: String<160> = String::new();
    let _ = write!(
        head,
        "HTTP/1.1 {}\r\n\
         Connection: close\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         \r\n",
        status,
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)
}

fn respond_json<T: Transport, M: Serialize>(stream: &mut T, msg: &M) -> Result<(), TransportError> {
    match protocol::serialize(msg) {
        Some(body) => respond(stream, "200 OK", "application/json", &body),
        None => respond(stream, "500 Internal Server Error", "text/plain", b"Internal Server Error"),
    }
}
