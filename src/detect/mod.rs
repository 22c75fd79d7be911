//! Frame detection: tensor decode, NMS and the inference backends.
//!
//! Detection runs off the ingestion path. A frame that fails to decode or
//! infer is skipped on its own; telemetry publication never depends on it.

mod backend;
pub mod backends;
pub mod decode;
pub mod nms;
pub mod pipeline;
mod result;
pub mod worker;

pub use backend::InferenceBackend;
pub use backends::{build_backend, StubBackend};
pub use decode::{decode_candidates, ModelShape};
pub use nms::{iou, non_max_suppression};
pub use pipeline::{decode_payload, DetectionParams, DetectionPipeline};
pub use result::{BoundingBox, DetectionResult};
pub use worker::{DetectionJob, DetectionWorker};
