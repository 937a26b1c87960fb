//! Firmware update discovery.
//!
//! Release metadata comes from the GitHub "latest release" API. Only the
//! release `id` and the `firmware.bin` asset URL are read; everything else
//! in the document is skipped. The platform supplies the actual HTTPS fetch
//! and partition write behind [`UpdateChecker`].
use heapless::{String, Vec};
use serde::Deserialize;

use crate::config::{Config, ConfigKey, ConfigStorage, StorageError};

pub const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/kolbyjack/32-bubbles/releases/latest";

/// Asset name of the application image within a release
pub const FIRMWARE_ASSET: &str = "firmware.bin";

pub const USER_AGENT: &str = concat!("bubblebridge/", env!("CARGO_PKG_VERSION"));

pub const MAX_URL_LEN: usize = 256;

pub type UrlString = String<MAX_URL_LEN>;

const MAX_ASSETS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    /// Nothing newer than the installed release is known
    NoUpdate,
    /// Connection or transfer failure
    Network,
    /// Server answered with a non-success status
    Http(u16),
    /// Release metadata could not be parsed
    Metadata,
    /// Writing or activating the update partition failed
    Flash,
    Storage(StorageError),
}

impl core::fmt::Display for OtaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OtaError::NoUpdate => f.write_str("no update available"),
            OtaError::Network => f.write_str("network error"),
            OtaError::Http(status) => write!(f, "HTTP status {}", status),
            OtaError::Metadata => f.write_str("malformed release metadata"),
            OtaError::Flash => f.write_str("flash write failed"),
            OtaError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl From<StorageError> for OtaError {
    fn from(e: StorageError) -> Self {
        OtaError::Storage(e)
    }
}

/// Update capability consumed by the HTTP server.
pub trait UpdateChecker {
    /// Fetch release metadata unless a check already succeeded this boot.
    /// Returns whether an update is available.
    fn refresh(&mut self) -> bool;

    fn is_update_available(&self) -> bool;

    /// Download and activate the update. Restarts the device on success,
    /// so it only ever returns the reason it failed.
    fn download_and_apply<S: ConfigStorage>(
        &mut self,
        config: &mut Config,
        storage: &mut S,
    ) -> OtaError;
}

/// What the latest release offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub id: u32,
    pub firmware_url: Option<UrlString>,
}

#[derive(Deserialize)]
struct ReleaseJson<'a> {
    #[serde(default)]
    id: u32,
    #[serde(borrow, default)]
    assets: Vec<AssetJson<'a>, MAX_ASSETS>,
}

#[derive(Deserialize)]
struct AssetJson<'a> {
    #[serde(default)]
    name: &'a str,
    #[serde(default)]
    browser_download_url: &'a str,
}

/// Parse a release document.
pub fn parse_release(json: &[u8]) -> Result<ReleaseInfo, OtaError> {
    let (release, _) =
        serde_json_core::from_slice::<ReleaseJson>(json).map_err(|_| OtaError::Metadata)?;
    let firmware_url = release
        .assets
        .iter()
        .find(|a| a.name == FIRMWARE_ASSET && !a.browser_download_url.is_empty())
        .and_then(|a| UrlString::try_from(a.browser_download_url).ok());
    Ok(ReleaseInfo {
        id: release.id,
        firmware_url,
    })
}

/// Result of this boot's release check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateState {
    checked: bool,
    release: Option<ReleaseInfo>,
}

impl UpdateState {
    pub const fn new() -> Self {
        Self {
            checked: false,
            release: None,
        }
    }

    pub fn needs_check(&self) -> bool {
        !self.checked
    }

    /// Store a check result. Network failures leave the check pending so a
    /// later refresh tries again; anything that reached the server counts.
    pub fn record(&mut self, result: Result<ReleaseInfo, OtaError>) {
        match result {
            Ok(info) => {
                log::info!(
                    "OTA: latest release {} ({})",
                    info.id,
                    if info.firmware_url.is_some() { "firmware attached" } else { "no firmware" }
                );
                self.release = Some(info);
                self.checked = true;
            }
            Err(OtaError::Network) => log::warn!("OTA: release check failed"),
            Err(e) => {
                log::warn!("OTA: release check failed: {}", e);
                self.release = None;
                self.checked = true;
            }
        }
    }

    /// The release to install, if it differs from `installed_release`.
    pub fn pending(&self, installed_release: i32) -> Option<&ReleaseInfo> {
        self.release.as_ref().filter(|r| {
            r.firmware_url.is_some() && r.id != 0 && i64::from(r.id) != i64::from(installed_release)
        })
    }

    pub fn is_update_available(&self, installed_release: i32) -> bool {
        self.pending(installed_release).is_some()
    }
}

/// Remember the release now installed. Called once the new image is
/// marked bootable, before restarting into it.
pub fn commit_release<S: ConfigStorage>(
    config: &mut Config,
    storage: &mut S,
    release_id: u32,
) -> Result<(), StorageError> {
    config.set_int(ConfigKey::ReleaseId, i32::try_from(release_id).unwrap_or(i32::MAX));
    config.save(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStorage;

    const RELEASE: &str = r#"{
        "url": "https://api.github.com/repos/o/r/releases/1234",
        "id": 1234,
        "draft": false,
        "author": {"login": "someone", "id": 5, "site_admin": false},
        "body": null,
        "assets": [
            {"name": "CHANGELOG.txt", "size": 10, "browser_download_url": "https://example.com/CHANGELOG.txt"},
            {"name": "firmware.bin", "size": 900000, "uploader": {"login": "x"}, "browser_download_url": "https://example.com/firmware.bin"}
        ],
        "tag_name": "v1.2.3"
    }"#;

    fn info(id: u32, url: Option<&str>) -> ReleaseInfo {
        ReleaseInfo {
            id,
            firmware_url: url.map(|u| UrlString::try_from(u).unwrap()),
        }
    }

    // ── Metadata parsing ────────────────────────────────────────────

    #[test]
    fn parses_id_and_firmware_asset() {
        let release = parse_release(RELEASE.as_bytes()).unwrap();
        assert_eq!(release.id, 1234);
        assert_eq!(
            release.firmware_url.as_deref(),
            Some("https://example.com/firmware.bin")
        );
    }

    #[test]
    fn release_without_firmware_asset() {
        let release = parse_release(br#"{"id":7,"assets":[{"name":"notes.md","browser_download_url":"u"}]}"#).unwrap();
        assert_eq!(release, info(7, None));
    }

    #[test]
    fn missing_fields_default() {
        assert_eq!(parse_release(b"{}").unwrap(), info(0, None));
    }

    #[test]
    fn garbage_is_metadata_error() {
        assert_eq!(parse_release(b"<html>"), Err(OtaError::Metadata));
    }

    // ── Availability rule ───────────────────────────────────────────

    #[test]
    fn available_when_newer_release_has_firmware() {
        let mut state = UpdateState::new();
        assert!(state.needs_check());
        state.record(Ok(info(1234, Some("https://x/firmware.bin"))));
        assert!(!state.needs_check());
        assert!(state.is_update_available(0));
        assert!(state.is_update_available(1000));
        assert!(!state.is_update_available(1234));
    }

    #[test]
    fn not_available_without_url_or_id() {
        let mut state = UpdateState::new();
        state.record(Ok(info(1234, None)));
        assert!(!state.is_update_available(0));
        state.record(Ok(info(0, Some("https://x/firmware.bin"))));
        assert!(!state.is_update_available(5));
    }

    #[test]
    fn network_failure_keeps_check_pending() {
        let mut state = UpdateState::new();
        state.record(Err(OtaError::Network));
        assert!(state.needs_check());
        state.record(Err(OtaError::Metadata));
        assert!(!state.needs_check());
        assert!(!state.is_update_available(0));
    }

    // ── Installed release bookkeeping ───────────────────────────────

    #[test]
    fn commit_release_persists_id() {
        let mut config = Config::new();
        let mut storage = MemoryStorage::default();
        commit_release(&mut config, &mut storage, 1234).unwrap();
        assert_eq!(config.get_int(ConfigKey::ReleaseId), 1234);
        assert_eq!(storage.ints.get("release_id"), Some(&1234));
        assert_eq!(storage.commits, 1);
    }
}
