//! Record ingestion.
//!
//! Turns the raw byte stream from the wearable into typed telemetry:
//! - `lines`: framing of newline-delimited records
//! - `telemetry`: schema decoding of a single record
//!
//! The ingestion layer MUST NOT:
//! - Treat a single bad record as fatal to the stream
//! - Retain snapshots beyond handoff to the StateStore
//! - Log image payload content

pub mod lines;
pub mod telemetry;

pub use lines::{FrameReader, MAX_RECORD_BYTES};
pub use telemetry::{decode_record, DecodeError, ImagePayload, TelemetrySnapshot, Vector3};
