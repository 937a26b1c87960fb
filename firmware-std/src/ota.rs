//! Release checks and image download over HTTPS.

use bubblebridge::config::{Config, ConfigKey, ConfigStorage};
use bubblebridge::ota::{
    commit_release, parse_release, OtaError, ReleaseInfo, UpdateChecker, UpdateState,
    LATEST_RELEASE_URL, USER_AGENT,
};
use esp_idf_svc::hal::reset::restart;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection, FollowRedirectsPolicy};
use esp_idf_svc::http::Method;
use esp_idf_svc::ota::EspOta;

/// Release documents carry the full changelog; anything larger is refused.
const MAX_RELEASE_JSON: usize = 48 * 1024;

const CHUNK_LEN: usize = 4096;

pub struct HttpsUpdater {
    state: UpdateState,
    installed_release: i32,
}

impl HttpsUpdater {
    pub fn new(config: &Config) -> Self {
        Self {
            state: UpdateState::new(),
            installed_release: config.get_int(ConfigKey::ReleaseId),
        }
    }
}

fn open(url: &str, accept: &str) -> Result<EspHttpConnection, OtaError> {
    let mut conn = EspHttpConnection::new(&Configuration {
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        follow_redirects_policy: FollowRedirectsPolicy::FollowAll,
        buffer_size: Some(2048),
        ..Default::default()
    })
    .map_err(|_| OtaError::Network)?;

    let headers = [("User-Agent", USER_AGENT), ("Accept", accept)];
    conn.initiate_request(Method::Get, url, &headers)
        .map_err(|_| OtaError::Network)?;
    conn.initiate_response().map_err(|_| OtaError::Network)?;

    match conn.status() {
        200 => Ok(conn),
        status => Err(OtaError::Http(status)),
    }
}

fn fetch_release() -> Result<ReleaseInfo, OtaError> {
    let mut conn = open(LATEST_RELEASE_URL, "application/vnd.github+json")?;
    let mut body = Vec::with_capacity(CHUNK_LEN);
    let mut chunk = [0u8; 512];
    loop {
        let n = conn.read(&mut chunk).map_err(|_| OtaError::Network)?;
        if n == 0 {
            break;
        }
        if body.len() + n > MAX_RELEASE_JSON {
            log::warn!("OTA: release document exceeds {} bytes", MAX_RELEASE_JSON);
            return Err(OtaError::Metadata);
        }
        body.extend_from_slice(&chunk[..n]);
    }
    parse_release(&body)
}

/// Stream the image into the inactive slot and mark it bootable.
fn flash_image(url: &str) -> Result<(), OtaError> {
    let mut conn = open(url, "application/octet-stream")?;
    let mut ota = EspOta::new().map_err(|_| OtaError::Flash)?;
    let mut update = ota.initiate_update().map_err(|_| OtaError::Flash)?;

    let mut buf = vec![0u8; CHUNK_LEN];
    let mut total = 0usize;
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("OTA: download failed after {} bytes: {}", total, e);
                let _ = update.abort();
                return Err(OtaError::Network);
            }
        };
        if let Err(e) = update.write(&buf[..n]) {
            log::warn!("OTA: flash write failed: {}", e);
            let _ = update.abort();
            return Err(OtaError::Flash);
        }
        total += n;
    }

    log::info!("OTA: {} bytes written", total);
    update.complete().map_err(|_| OtaError::Flash)
}

impl UpdateChecker for HttpsUpdater {
    fn refresh(&mut self) -> bool {
        if self.state.needs_check() {
            self.state.record(fetch_release());
        }
        self.is_update_available()
    }

    fn is_update_available(&self) -> bool {
        self.state.is_update_available(self.installed_release)
    }

    fn download_and_apply<S: ConfigStorage>(&mut self, config: &mut Config, storage: &mut S) -> OtaError {
        let Some(release) = self.state.pending(self.installed_release).cloned() else {
            return OtaError::NoUpdate;
        };
        let Some(url) = release.firmware_url.as_deref() else {
            return OtaError::NoUpdate;
        };

        log::info!("OTA: installing release {} from {}", release.id, url);
        if let Err(e) = flash_image(url) {
            log::error!("OTA: update failed: {}", e);
            return e;
        }
        if let Err(e) = commit_release(config, storage, release.id) {
            log::error!("OTA: could not record release: {}", e);
            return e.into();
        }

        log::info!("OTA: release {} installed, restarting", release.id);
        restart();
    }
}
