//! PathPal wearable link core
//!
//! Turns the raw byte stream from a chest-worn wearable into structured
//! telemetry and, when a record embeds a camera frame, into labeled
//! bounding boxes.
//!
//! # Data Flow
//!
//! ```text
//! bytes -> FrameReader -> record -> decode_record -> TelemetrySnapshot -> StateStore
//!                                                        |
//!                                                        +-> DetectionWorker -> DetectionPipeline -> StateStore
//! ```
//!
//! # Module Structure
//!
//! - `transport`: radio and channel abstraction (TCP bridge, in-memory)
//! - `ingest`: record framing and telemetry decoding
//! - `session`: connection state machine and ingestion loop
//! - `detect`: tensor decode, NMS, inference backends, detection worker
//! - `state`: latest-value channels for presentation layers
//! - `config`: daemon configuration

use std::fmt;

pub mod config;
pub mod detect;
pub mod ingest;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{DetectorSettings, DeviceSettings, PathpaldConfig};
pub use detect::{
    BoundingBox, DetectionParams, DetectionPipeline, DetectionResult, DetectionWorker,
    InferenceBackend, ModelShape,
};
pub use ingest::{decode_record, DecodeError, FrameReader, ImagePayload, TelemetrySnapshot};
pub use session::{Session, SessionError};
pub use state::{Latest, StateStore, Watcher};
pub use transport::{Channel, Radio, ServiceId, SERIAL_PORT_PROFILE};

/// Link state as owned by `Session`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt did not establish a link.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
