/// JSON messages published to the broker and served over HTTP.
///
/// Topics and payloads follow the Happy Bubbles presence server layout.
/// Everything is built in `heapless` buffers and serialized with
/// `serde_json_core`.
use core::fmt::Write;

use heapless::{String, Vec};
use serde::Serialize;

use crate::beacon::BeaconRecord;
use crate::cache::Sighting;
use crate::config::{Config, ConfigKey};

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Topic root for per-sighting reports
pub const BLE_TOPIC_ROOT: &str = "happy-bubbles/ble";

/// Topic root for scanner statistics
pub const STATS_TOPIC_ROOT: &str = "happy-bubbles/stats";

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Maximum topic length (root + 64-byte hostname + kind + 16-byte id in hex)
pub const MAX_TOPIC_LEN: usize = 128;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;

pub type Topic = String<MAX_TOPIC_LEN>;

/// Hex of a 6-byte address
pub type MacHex = String<12>;

/// Hex of a full advertisement
pub type DataHex = String<124>;

/// Hex of a 16-byte beacon id
pub type IdHex = String<32>;

// ── Hex formatting ─────────────────────────────────────────────────────

/// Lowercase hex of `bytes`, no separators. Stops at capacity.
pub fn hex<const N: usize>(bytes: &[u8]) -> String<N> {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::new();
    for &b in bytes {
        if out.push(DIGITS[(b >> 4) as usize] as char).is_err()
            || out.push(DIGITS[(b & 0x0f) as usize] as char).is_err()
        {
            break;
        }
    }
    out
}

fn hex_u16(value: u16) -> String<4> {
    hex(&value.to_be_bytes())
}

fn hex_i8(value: i8) -> String<2> {
    hex(&[value as u8])
}

// ── Messages ───────────────────────────────────────────────────────────

/// Report sent for every sighting, decoded or not.
#[derive(Debug, Serialize)]
pub struct RawReport<'a> {
    pub hostname: &'a str,
    pub mac: &'a str,
    pub rssi: i8,
    pub data: &'a str,
}

/// iBeacon report. AltBeacons use it too, since the presence server only
/// understands iBeacons.
#[derive(Debug, Serialize)]
pub struct IBeaconReport<'a> {
    pub hostname: &'a str,
    pub beacon_type: &'static str,
    pub mac: &'a str,
    pub rssi: i8,
    pub data: &'a str,
    pub uuid: &'a str,
    pub major: &'a str,
    pub minor: &'a str,
    pub tx_power: &'a str,
}

/// Eddystone-UID report.
#[derive(Debug, Serialize)]
pub struct EddystoneReport<'a> {
    pub hostname: &'a str,
    pub beacon_type: &'static str,
    pub mac: &'a str,
    pub rssi: i8,
    pub data: &'a str,
    pub namespace: &'a str,
    pub instance_id: &'a str,
    pub tx_power: &'a str,
}

/// Periodic scanner statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub boot_count: u32,
    pub seen: u32,
    pub pub_raw: u32,
    pub pub_ibeacon: u32,
    pub pub_eddystone: u32,
    pub pub_err: u32,
    pub total_alloc: u32,
    pub total_free: u32,
}

/// `GET /config` body. Passwords are never included.
#[derive(Debug, Serialize)]
pub struct ConfigView<'a> {
    pub hostname: &'a str,
    pub wifi_ssid: &'a str,
    pub mqtt_host: &'a str,
    pub mqtt_port: i32,
    pub mqtt_tls: bool,
    pub mqtt_user: &'a str,
}

impl<'a> ConfigView<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            hostname: config.get_str(ConfigKey::Hostname),
            wifi_ssid: config.get_str(ConfigKey::WifiSsid),
            mqtt_host: config.get_str(ConfigKey::MqttHost),
            mqtt_port: config.get_int(ConfigKey::MqttPort),
            mqtt_tls: config.get_int(ConfigKey::MqttTls) != 0,
            mqtt_user: config.get_str(ConfigKey::MqttUser),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateCheckResponse {
    pub update_available: bool,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub downloading: bool,
}

/// Serialize a message into a fixed buffer.
pub fn serialize<T: Serialize>(msg: &T) -> Option<MsgBuffer> {
    let mut buf = [0u8; MAX_MSG_LEN];
    match serde_json_core::to_slice(msg, &mut buf) {
        Ok(len) => Vec::from_slice(&buf[..len]).ok(),
        Err(_) => {
            log::warn!("JSON message exceeds {} bytes", MAX_MSG_LEN);
            None
        }
    }
}

// ── Publications ───────────────────────────────────────────────────────

/// A topic and payload ready to hand to the MQTT client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: Topic,
    pub payload: MsgBuffer,
}

impl Publication {
    pub fn payload_str(&self) -> &str {
        core::str::from_utf8(&self.payload).unwrap_or("")
    }
}

fn topic(root: &str, hostname: &str, kind: Option<(&str, &str)>) -> Option<Topic> {
    let mut t = Topic::new();
    let written = match kind {
        Some((kind, id)) => write!(t, "{}/{}/{}/{}", root, hostname, kind, id),
        None => write!(t, "{}/{}", root, hostname),
    };
    match written {
        Ok(()) => Some(t),
        Err(_) => {
            log::warn!("topic for {} exceeds {} bytes", hostname, MAX_TOPIC_LEN);
            None
        }
    }
}

/// `happy-bubbles/ble/<host>/raw/<mac>` with the whole advertisement.
pub fn raw_publication(hostname: &str, sighting: &Sighting) -> Option<Publication> {
    let mac: MacHex = hex(&sighting.address);
    let data: DataHex = hex(&sighting.adv);
    let report = RawReport {
        hostname,
        mac: &mac,
        rssi: sighting.rssi,
        data: &data,
    };
    Some(Publication {
        topic: topic(BLE_TOPIC_ROOT, hostname, Some(("raw", &mac)))?,
        payload: serialize(&report)?,
    })
}

/// Typed report for a decoded beacon; `None` for [`BeaconRecord::Unknown`].
pub fn beacon_publication(
    hostname: &str,
    sighting: &Sighting,
    record: &BeaconRecord,
) -> Option<Publication> {
    let mac: MacHex = hex(&sighting.address);
    let data: DataHex = hex(&sighting.adv);

    match record {
        BeaconRecord::IBeacon(b) => {
            ibeacon_publication(hostname, &mac, sighting.rssi, &data, &b.uuid, b.major, b.minor, b.measured_power)
        }
        BeaconRecord::AltBeacon(b) => {
            ibeacon_publication(hostname, &mac, sighting.rssi, &data, &b.beacon_id, b.major, b.minor, b.ref_rssi)
        }
        BeaconRecord::Eddystone(b) => {
            let namespace: String<20> = hex(&b.namespace);
            let instance: String<12> = hex(&b.instance);
            let tx_power = hex_i8(b.tx_power);
            let report = EddystoneReport {
                hostname,
                beacon_type: "eddystone",
                mac: &mac,
                rssi: sighting.rssi,
                data: &data,
                namespace: &namespace,
                instance_id: &instance,
                tx_power: &tx_power,
            };
            Some(Publication {
                topic: topic(BLE_TOPIC_ROOT, hostname, Some(("eddystone", &namespace)))?,
                payload: serialize(&report)?,
            })
        }
        BeaconRecord::Unknown => None,
    }
}

#[allow(clippy::too_many_arguments)]
fn ibeacon_publication(
    hostname: &str,
    mac: &str,
    rssi: i8,
    data: &str,
    id: &[u8; 16],
    major: u16,
    minor: u16,
    power: i8,
) -> Option<Publication> {
    let uuid: IdHex = hex(id);
    let major = hex_u16(major);
    let minor = hex_u16(minor);
    let tx_power = hex_i8(power);
    let report = IBeaconReport {
        hostname,
        beacon_type: "ibeacon",
        mac,
        rssi,
        data,
        uuid: &uuid,
        major: &major,
        minor: &minor,
        tx_power: &tx_power,
    };
    Some(Publication {
        topic: topic(BLE_TOPIC_ROOT, hostname, Some(("ibeacon", &uuid)))?,
        payload: serialize(&report)?,
    })
}

/// `happy-bubbles/stats/<host>`
pub fn stats_publication(hostname: &str, stats: &StatsReport) -> Option<Publication> {
    Some(Publication {
        topic: topic(STATS_TOPIC_ROOT, hostname, None)?,
        payload: serialize(stats)?,
    })
}
