/// Beacon advertisement decoders for iBeacon, Eddystone-UID and AltBeacon.
///
/// Each format is a fixed-length advertisement with constant header bytes.
/// Decoding checks the length and every constant byte before copying the
/// variable fields out; a mismatch is [`DecodeError::NotFound`], which only
/// means "try the next format".
///
/// Multi-byte numeric fields are big-endian on the wire.

/// Largest advertisement (advertising data + scan response) the radio delivers.
pub const MAX_ADV_LEN: usize = 62;

// ── Wire constants ─────────────────────────────────────────────────────

/// AD flags structure: LE General Discoverable, BR/EDR not supported.
const FLAGS: [u8; 3] = [0x02, 0x01, 0x06];

/// iBeacon header after the flags: length, manufacturer data, Apple, type 0x02 len 0x15.
const IBEACON_HEAD: [u8; 6] = [0x1A, 0xFF, 0x4C, 0x00, 0x02, 0x15];
pub const IBEACON_LEN: usize = 30;

/// Eddystone header after the flags: complete 16-bit UUID list with 0xFEAA,
/// then the service data structure carrying a UID frame.
const EDDYSTONE_HEAD: [u8; 8] = [0x03, 0x03, 0xAA, 0xFE, 0x17, 0x16, 0xAA, 0xFE];
const EDDYSTONE_FRAME_UID: u8 = 0x00;
pub const EDDYSTONE_LEN: usize = 31;

const ALTBEACON_AD_LEN: u8 = 0x1B;
const ALTBEACON_AD_TYPE: u8 = 0xFF;
const ALTBEACON_CODE: u16 = 0xBEAC;
pub const ALTBEACON_LEN: usize = 28;

// ── Records ────────────────────────────────────────────────────────────

/// Supported beacon wire formats, in the order [`decode_any`] tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconFormat {
    IBeacon,
    Eddystone,
    AltBeacon,
}

impl BeaconFormat {
    pub const ALL: [BeaconFormat; 3] = [
        BeaconFormat::IBeacon,
        BeaconFormat::Eddystone,
        BeaconFormat::AltBeacon,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeacon {
    pub uuid: [u8; 16],
    pub major: u16,
    pub minor: u16,
    /// Calibrated RSSI at 1 m
    pub measured_power: i8,
}

/// Eddystone UID frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eddystone {
    /// Calibrated TX power at 0 m
    pub tx_power: i8,
    pub namespace: [u8; 10],
    pub instance: [u8; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltBeacon {
    /// Manufacturer company ID (little-endian on the wire, like all AD company IDs)
    pub mfg_id: u16,
    pub beacon_id: [u8; 16],
    pub major: u16,
    pub minor: u16,
    /// Reference RSSI at 1 m
    pub ref_rssi: i8,
    pub reserved: u8,
}

/// A decoded beacon. `Unknown` marks an advertisement no decoder accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconRecord {
    IBeacon(IBeacon),
    Eddystone(Eddystone),
    AltBeacon(AltBeacon),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Length or a constant byte does not match this format
    NotFound,
    /// Input larger than any advertisement the radio can deliver
    InvalidArgument,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::NotFound => f.write_str("not a recognized beacon"),
            DecodeError::InvalidArgument => f.write_str("advertisement exceeds maximum length"),
        }
    }
}

// ── Decoding ───────────────────────────────────────────────────────────

/// Decode `buf` as the given beacon format.
pub fn decode(format: BeaconFormat, buf: &[u8]) -> Result<BeaconRecord, DecodeError> {
    if buf.len() > MAX_ADV_LEN {
        return Err(DecodeError::InvalidArgument);
    }
    match format {
        BeaconFormat::IBeacon => decode_ibeacon(buf).map(BeaconRecord::IBeacon),
        BeaconFormat::Eddystone => decode_eddystone(buf).map(BeaconRecord::Eddystone),
        BeaconFormat::AltBeacon => decode_altbeacon(buf).map(BeaconRecord::AltBeacon),
    }
}

/// Try every format in order; first match wins.
///
/// Returns [`BeaconRecord::Unknown`] when nothing matches, so callers can
/// still report the raw advertisement.
pub fn decode_any(buf: &[u8]) -> BeaconRecord {
    BeaconFormat::ALL
        .iter()
        .find_map(|&format| decode(format, buf).ok())
        .unwrap_or(BeaconRecord::Unknown)
}

fn decode_ibeacon(buf: &[u8]) -> Result<IBeacon, DecodeError> {
    // Some advertisers drop the flags structure; rebuild it so both
    // variants share one layout.
    let mut full = [0u8; IBEACON_LEN];
    if buf.len() == IBEACON_LEN {
        full.copy_from_slice(buf);
    } else if buf.len() + FLAGS.len() == IBEACON_LEN {
        full[..FLAGS.len()].copy_from_slice(&FLAGS);
        full[FLAGS.len()..].copy_from_slice(buf);
    } else {
        return Err(DecodeError::NotFound);
    }

    if full[0..3] != FLAGS || full[3..9] != IBEACON_HEAD {
        return Err(DecodeError::NotFound);
    }

    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&full[9..25]);
    Ok(IBeacon {
        uuid,
        major: u16::from_be_bytes([full[25], full[26]]),
        minor: u16::from_be_bytes([full[27], full[28]]),
        measured_power: full[29] as i8,
    })
}

fn decode_eddystone(buf: &[u8]) -> Result<Eddystone, DecodeError> {
    if buf.len() != EDDYSTONE_LEN
        || buf[0..3] != FLAGS
        || buf[3..11] != EDDYSTONE_HEAD
        || buf[11] != EDDYSTONE_FRAME_UID
    {
        return Err(DecodeError::NotFound);
    }

    let mut namespace = [0u8; 10];
    namespace.copy_from_slice(&buf[13..23]);
    let mut instance = [0u8; 6];
    instance.copy_from_slice(&buf[23..29]);
    Ok(Eddystone {
        tx_power: buf[12] as i8,
        namespace,
        instance,
    })
}

fn decode_altbeacon(buf: &[u8]) -> Result<AltBeacon, DecodeError> {
    if buf.len() != ALTBEACON_LEN
        || buf[0] != ALTBEACON_AD_LEN
        || buf[1] != ALTBEACON_AD_TYPE
        || u16::from_be_bytes([buf[4], buf[5]]) != ALTBEACON_CODE
    {
        return Err(DecodeError::NotFound);
    }

    let mut beacon_id = [0u8; 16];
    beacon_id.copy_from_slice(&buf[6..22]);
    Ok(AltBeacon {
        mfg_id: u16::from_le_bytes([buf[2], buf[3]]),
        beacon_id,
        major: u16::from_be_bytes([buf[22], buf[23]]),
        minor: u16::from_be_bytes([buf[24], buf[25]]),
        ref_rssi: buf[26] as i8,
        reserved: buf[27],
    })
}

// ── Encoding ───────────────────────────────────────────────────────────

/// Build a full (flags-prefixed) iBeacon advertisement.
pub fn encode_ibeacon(beacon: &IBeacon) -> [u8; IBEACON_LEN] {
    let mut out = [0u8; IBEACON_LEN];
    out[0..3].copy_from_slice(&FLAGS);
    out[3..9].copy_from_slice(&IBEACON_HEAD);
    out[9..25].copy_from_slice(&beacon.uuid);
    out[25..27].copy_from_slice(&beacon.major.to_be_bytes());
    out[27..29].copy_from_slice(&beacon.minor.to_be_bytes());
    out[29] = beacon.measured_power as u8;
    out
}

/// Build an Eddystone-UID advertisement. The two RFU bytes are zero.
pub fn encode_eddystone(beacon: &Eddystone) -> [u8; EDDYSTONE_LEN] {
    let mut out = [0u8; EDDYSTONE_LEN];
    out[0..3].copy_from_slice(&FLAGS);
    out[3..11].copy_from_slice(&EDDYSTONE_HEAD);
    out[11] = EDDYSTONE_FRAME_UID;
    out[12] = beacon.tx_power as u8;
    out[13..23].copy_from_slice(&beacon.namespace);
    out[23..29].copy_from_slice(&beacon.instance);
    out
}

pub fn encode_altbeacon(beacon: &AltBeacon) -> [u8; ALTBEACON_LEN] {
    let mut out = [0u8; ALTBEACON_LEN];
    out[0] = ALTBEACON_AD_LEN;
    out[1] = ALTBEACON_AD_TYPE;
    out[2..4].copy_from_slice(&beacon.mfg_id.to_le_bytes());
    out[4..6].copy_from_slice(&ALTBEACON_CODE.to_be_bytes());
    out[6..22].copy_from_slice(&beacon.beacon_id);
    out[22..24].copy_from_slice(&beacon.major.to_be_bytes());
    out[24..26].copy_from_slice(&beacon.minor.to_be_bytes());
    out[26] = beacon.ref_rssi as u8;
    out[27] = beacon.reserved;
    out
}
