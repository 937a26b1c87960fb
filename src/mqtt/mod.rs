//! Minimal MQTT 3.1.1 publisher.
//!
//! Only what a beacon bridge needs: CONNECT with optional credentials,
//! QoS 0 PUBLISH, and CONNACK validation. Everything else the broker sends
//! is length-checked and dropped.

pub mod client;
pub mod codec;

pub use client::{ConnectionState, MessageSink, MqttClient, MqttError, MqttOptions};
