//! Frame-to-boxes detection pipeline.
//!
//! 1. Decode the base64 payload into an RGB raster
//! 2. Resize (bilinear) to the model input and scale channels to [0, 1]
//! 3. Run the backend
//! 4. Decode output planes into pixel-space boxes for the original raster
//! 5. Collapse overlaps with NMS
//!
//! Any failure aborts the current frame only.

use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::backend::InferenceBackend;
use super::decode::{decode_candidates, ModelShape};
use super::nms::non_max_suppression;
use super::result::DetectionResult;
use crate::ingest::ImagePayload;

/// Upper bound on a decoded image payload.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_LABEL: &str = "crosswalk";

/// Standard alphabet, padding optional.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Tunable post-processing parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionParams {
    /// Candidates must score strictly above this to be considered.
    pub confidence_threshold: f32,
    /// Boxes overlapping a kept box at or above this IoU are suppressed.
    pub iou_threshold: f32,
    /// Label attached to every box from a single-class model.
    pub label: String,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

pub struct DetectionPipeline {
    // `infer` takes `&mut self`; one frame runs through the model at a time.
    backend: Mutex<Box<dyn InferenceBackend>>,
    shape: ModelShape,
    params: DetectionParams,
}

impl DetectionPipeline {
    pub fn new(backend: Box<dyn InferenceBackend>, params: DetectionParams) -> Self {
        let shape = backend.shape();
        Self {
            backend: Mutex::new(backend),
            shape,
            params,
        }
    }

    pub fn shape(&self) -> ModelShape {
        self.shape
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Decode a wire payload and run detection on it.
    pub fn process(&self, frame_id: u64, payload: &ImagePayload) -> Result<DetectionResult> {
        let frame = decode_payload(payload.as_str())
            .with_context(|| format!("frame {}: image decode failed", frame_id))?;
        self.detect_frame(frame_id, frame)
    }

    /// Run detection on an already decoded raster.
    pub fn detect_frame(&self, frame_id: u64, frame: RgbImage) -> Result<DetectionResult> {
        let input = preprocess(&frame, self.shape.width, self.shape.height);

        let output = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| anyhow!("inference backend lock poisoned"))?;
            backend
                .infer(&input)
                .with_context(|| format!("frame {}: inference failed", frame_id))?
        };
        if output.len() != self.shape.output_len() {
            bail!(
                "frame {}: model produced {} floats, expected {}",
                frame_id,
                output.len(),
                self.shape.output_len()
            );
        }

        let candidates = decode_candidates(
            &output,
            self.shape.candidates,
            frame.width(),
            frame.height(),
            self.params.confidence_threshold,
            &self.params.label,
        );
        let considered = candidates.len();
        let boxes = non_max_suppression(candidates, self.params.iou_threshold);
        log::debug!(
            "frame {}: {} candidates above threshold, {} after nms",
            frame_id,
            considered,
            boxes.len()
        );

        Ok(DetectionResult {
            frame_id,
            frame,
            boxes,
        })
    }
}

/// Decode a base64 image payload into an RGB raster.
///
/// Embedded whitespace and line breaks are ignored; padding is optional.
pub fn decode_payload(encoded: &str) -> Result<RgbImage> {
    let compact: Vec<u8> = encoded
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        bail!("image payload is empty");
    }
    if compact.len() / 4 * 3 > MAX_PAYLOAD_BYTES {
        bail!(
            "image payload exceeds {} bytes (encoded length {})",
            MAX_PAYLOAD_BYTES,
            compact.len()
        );
    }
    let bytes = PAYLOAD_ENGINE
        .decode(&compact)
        .context("image payload is not valid base64")?;
    let image = image::load_from_memory(&bytes).context("image payload is not a decodable image")?;
    Ok(image.to_rgb8())
}

/// Bilinear resize to `width` x `height`, channels scaled from [0, 255] to [0, 1].
pub fn preprocess(frame: &RgbImage, width: u32, height: u32) -> Vec<f32> {
    let scale = |raw: Vec<u8>| -> Vec<f32> { raw.into_iter().map(|v| v as f32 / 255.0).collect() };
    if frame.width() == width && frame.height() == height {
        return scale(frame.as_raw().clone());
    }
    let resized = imageops::resize(frame, width, height, FilterType::Triangle);
    scale(resized.into_raw())
}
