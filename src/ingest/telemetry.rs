//! Telemetry record decoding.
//!
//! Each record is one JSON object describing a complete snapshot of the
//! wearable's sensors. Records are never deltas: a decoded snapshot replaces
//! the previous one wholesale.
//!
//! ```text
//! {"bpm": 72, "dist_cm": 45.0, "accel": [0, 0, 9.8], "gyro": [0, 0, 0], "image": ""}
//! ```
//!
//! Absent (or `null`) fields take their defaults. Unknown fields are ignored.
//! `bpm` accepts a float as long as it is a whole number (`72.0`).

use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// How much of a rejected record is echoed into logs.
const PREVIEW_CHARS: usize = 96;

/// Ordered `[x, y, z]` triple.
pub type Vector3 = [f64; 3];

/// One decoded record of sensor values from the wearable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySnapshot {
    /// Heart rate in beats per minute. 0 means no reading.
    pub heart_rate_bpm: u32,
    /// Range-finder distance in centimeters.
    pub distance_cm: f64,
    /// Linear acceleration, m/s^2.
    pub acceleration: Vector3,
    /// Angular velocity, rad/s.
    pub angular_velocity: Vector3,
    /// Base64-encoded camera frame, if this record carries one.
    pub image: Option<ImagePayload>,
}

impl TelemetrySnapshot {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Opaque image blob as carried on the wire (base64 text).
///
/// Clones share the underlying text, so a snapshot can be published and
/// handed to the detector without copying the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload(Arc<str>);

impl ImagePayload {
    pub fn new(encoded: impl Into<Arc<str>>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Payloads can be several hundred KB; keep them out of Debug output.
impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImagePayload({} bytes)", self.0.len())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not well-formed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record does not match telemetry schema: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("field '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Wire shape of a record. Every field is optional so that absent and `null`
/// fields both fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireRecord {
    #[serde(deserialize_with = "whole_count")]
    bpm: Option<u32>,
    dist_cm: Option<f64>,
    accel: Option<Vector3>,
    gyro: Option<Vector3>,
    image: Option<String>,
}

/// Non-negative integer that may arrive in float notation.
fn whole_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let whole = match number.as_u64() {
        Some(v) => Some(v),
        None => number
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
            .map(|f| f as u64),
    };
    whole
        .and_then(|v| u32::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| {
            D::Error::custom(format!("expected a whole non-negative count, got {}", number))
        })
}

/// Decode one text record into a snapshot.
pub fn decode_record(record: &str) -> Result<TelemetrySnapshot, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(record).map_err(DecodeError::Malformed)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let wire: WireRecord = serde_json::from_value(value).map_err(DecodeError::Schema)?;

    let distance_cm = wire.dist_cm.unwrap_or(0.0);
    if !distance_cm.is_finite() || distance_cm < 0.0 {
        return Err(DecodeError::OutOfRange {
            field: "dist_cm",
            value: distance_cm,
        });
    }

    Ok(TelemetrySnapshot {
        heart_rate_bpm: wire.bpm.unwrap_or(0),
        distance_cm,
        acceleration: wire.accel.unwrap_or_default(),
        angular_velocity: wire.gyro.unwrap_or_default(),
        image: wire
            .image
            .filter(|encoded| !encoded.is_empty())
            .map(ImagePayload::new),
    })
}

/// Short, log-safe excerpt of a record.
pub fn preview(record: &str) -> String {
    let mut out: String = record.chars().take(PREVIEW_CHARS).collect();
    if record.chars().nth(PREVIEW_CHARS).is_some() {
        out.push_str("...");
    }
    out
}
