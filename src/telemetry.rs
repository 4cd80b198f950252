//! # Telemetry Data Module
//!
//! Shared record types for sensor readings, sessions, and device metadata,
//! plus the decoding boundary for raw device payloads.
//!
//! ## Key Types
//! - `Reading`: one timestamped sensor sample (temperature + motion vector)
//! - `SessionPoint`: a reading plus the location fix known at capture time
//! - `Session`: a finalized, aggregated record of one recording interval
//!
//! All serialized shapes use camelCase field names to stay compatible with
//! the JSON the device emits and the remote session records.
//!
//! ## Why decode here
//! Payloads arrive as loosely-shaped JSON. The single `decode_frame` entry
//! point validates them into typed records so a malformed frame can be
//! dropped without disturbing the stream, and so derived values (the
//! accelerometer magnitude) are always recomputed rather than trusted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

static LAST_SESSION_ID: AtomicI64 = AtomicI64::new(0);

/// Produce a time-derived session id, unique for the process lifetime.
///
/// Ids are millisecond timestamps bumped past the previously issued id, so
/// two sessions started within the same millisecond still get distinct ids.
pub fn next_session_id() -> String {
    let now = now_ms();
    let mut last = LAST_SESSION_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_SESSION_ID.compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return candidate.to_string(),
            Err(actual) => last = actual,
        }
    }
}

/// A raw 3-axis vector as reported by the gyroscope or magnetometer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTriple {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AxisTriple {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Accelerometer sample with its derived Euclidean magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
}

impl AccelSample {
    /// Build a sample from raw axes; the magnitude is always derived here.
    pub fn from_axes(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, magnitude: (x * x + y * y + z * z).sqrt() }
    }
}

/// Geolocation fix attached to points and sessions when available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// One timestamped sensor sample. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub serial_number: String,
    /// Capture time, ms since the Unix epoch
    pub timestamp: i64,
    /// Water/board temperature in °C
    pub temperature: f64,
    pub accelerometer: AccelSample,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<AxisTriple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnetometer: Option<AxisTriple>,
}

/// Element of the in-progress session buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPoint {
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
}

/// Identity of a connected (or simulated) sensor device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// File descriptor advertised by a device's on-board storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorFile {
    pub name: String,
    pub size: u64,
    pub last_modified: i64,
}

/// A finalized, aggregated record of one recording interval.
///
/// Aggregates are computed exactly once when recording stops and are never
/// recomputed afterward; the id is unique across the pending, durable, and
/// remote collections, and collisions are treated as duplicates during
/// merge, never as overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: i64,
    pub end_time: i64,
    /// Whole seconds, floor((end_time - start_time) / 1000)
    pub duration: i64,
    pub data_points: usize,
    pub avg_temp: f64,
    pub max_temp: f64,
    pub min_temp: f64,
    pub max_accel: f64,
    pub avg_accel: f64,
    pub distance: f64,
    pub max_speed: f64,
    pub avg_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
    /// Raw data points; remote listings may omit these
    #[serde(default)]
    pub data: Vec<SessionPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

/// Link-health state owned by the connection manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub is_scanning: bool,
    pub is_connected: bool,
    pub connected_device: Option<DeviceInfo>,
}

/// Wire shape of a device data frame. Unknown fields (including any
/// magnitude the firmware might send) are ignored; missing numeric fields
/// default to zero so a sparse frame still yields a usable reading.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    serial_number: Option<String>,
    #[serde(default)]
    temperature: f64,
    accel: Option<RawAxes>,
    gyro: Option<AxisTriple>,
    mag: Option<AxisTriple>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAxes {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

/// Decode a raw device frame into a `Reading`.
///
/// Returns `None` on any parse failure; the caller drops the frame and the
/// stream continues. `fallback_serial` is used when the payload carries no
/// serial number (the connected device id in practice).
pub fn decode_frame(raw: &[u8], fallback_serial: &str) -> Option<Reading> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Dropping non-UTF8 sensor frame: {}", e);
            return None;
        }
    };

    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Dropping malformed sensor frame: {}", e);
            log::debug!("Raw frame was: {}", text);
            return None;
        }
    };

    let axes = frame.accel.unwrap_or_default();
    Some(Reading {
        serial_number: frame
            .serial_number
            .unwrap_or_else(|| fallback_serial.to_string()),
        timestamp: now_ms(),
        temperature: frame.temperature,
        accelerometer: AccelSample::from_axes(axes.x, axes.y, axes.z),
        gyroscope: frame.gyro,
        magnetometer: frame.mag,
    })
}
