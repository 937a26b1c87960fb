//! bubblebridge library — portable core of a BLE beacon to MQTT bridge.
//!
//! The device listens for beacon advertisements, keeps the latest sighting
//! of each address for one scan cycle, and republishes them as JSON over
//! MQTT. A small HTTP server handles configuration and firmware updates.
//!
//! Everything here is `no_std` with no allocator and testable on any host
//! with `cargo test`. The ESP-IDF firmware (`firmware-std/`) supplies the
//! radio, network transports, NVS storage, OTA partition writes and GPIO
//! through the capability traits in [`transport`], [`config`] and [`ota`].
//!
//! - Beacon path: [`beacon`] decoders, [`cache`], [`scanner`], [`protocol`], [`mqtt`]
//! - Config path: [`http`], [`config`], [`ota`]
//! - Supervision: [`watchdog`], [`button`], [`board`]

#![cfg_attr(not(test), no_std)]

pub mod beacon;
pub mod board;
pub mod button;
pub mod cache;
pub mod config;
pub mod http;
pub mod mqtt;
pub mod ota;
pub mod protocol;
pub mod scanner;
pub mod transport;
pub mod watchdog;
