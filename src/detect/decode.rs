//! Output tensor decoding.
//!
//! The model emits a `[1, 5, N]` tensor laid out as five parallel planes of
//! length N: all center-x values, then all center-y, widths, heights, scores.
//! Values are fractions of the model input size, so they scale directly to
//! the original frame dimensions.

use super::result::BoundingBox;

const PLANE_CX: usize = 0;
const PLANE_CY: usize = 1;
const PLANE_W: usize = 2;
const PLANE_H: usize = 3;
const PLANE_SCORE: usize = 4;

/// Number of planes per candidate.
pub const OUTPUT_PLANES: usize = 5;

/// Fixed tensor shape contract of a detection model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelShape {
    /// Input width in pixels.
    pub width: u32,
    /// Input height in pixels.
    pub height: u32,
    /// Candidate slots N in the output tensor.
    pub candidates: usize,
}

impl ModelShape {
    /// Float count of the `[1, W, H, 3]` input tensor.
    pub fn input_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Float count of the `[1, 5, N]` output tensor.
    pub fn output_len(&self) -> usize {
        OUTPUT_PLANES * self.candidates
    }
}

/// Turn raw output planes into pixel-space boxes.
///
/// Only candidates scoring strictly above `confidence_threshold` are kept.
/// Candidates with non-finite geometry are dropped. An output shorter than
/// `5 * candidates` yields no boxes.
pub fn decode_candidates(
    output: &[f32],
    candidates: usize,
    image_width: u32,
    image_height: u32,
    confidence_threshold: f32,
    label: &str,
) -> Vec<BoundingBox> {
    if output.len() < OUTPUT_PLANES * candidates {
        return Vec::new();
    }
    let plane = |index: usize, slot: usize| output[index * candidates + slot];
    let img_w = image_width as f32;
    let img_h = image_height as f32;

    let mut boxes = Vec::new();
    for slot in 0..candidates {
        let score = plane(PLANE_SCORE, slot);
        if score.is_nan() || score <= confidence_threshold {
            continue;
        }
        let cx = plane(PLANE_CX, slot);
        let cy = plane(PLANE_CY, slot);
        let w = plane(PLANE_W, slot);
        let h = plane(PLANE_H, slot);

        let x1 = (cx - w / 2.0) * img_w;
        let y1 = (cy - h / 2.0) * img_h;
        let x2 = (cx + w / 2.0) * img_w;
        let y2 = (cy + h / 2.0) * img_h;
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            continue;
        }
        boxes.push(BoundingBox::new(x1, y1, x2, y2, score, label));
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay candidates out as parallel planes.
    fn planes(candidates: &[[f32; 5]]) -> Vec<f32> {
        let n = candidates.len();
        let mut out = vec![0.0; OUTPUT_PLANES * n];
        for (slot, c) in candidates.iter().enumerate() {
            for (p, v) in c.iter().enumerate() {
                out[p * n + slot] = *v;
            }
        }
        out
    }

    #[test]
    fn scales_fractions_to_source_pixels() {
        let output = planes(&[[0.5, 0.5, 0.5, 0.25, 0.9]]);
        let boxes = decode_candidates(&output, 1, 200, 100, 0.5, "crosswalk");
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (50.0, 37.5, 150.0, 62.5));
        assert_eq!(b.score, 0.9);
        assert_eq!(b.label, "crosswalk");
    }

    #[test]
    fn threshold_is_exclusive() {
        let output = planes(&[
            [0.5, 0.5, 0.1, 0.1, 0.5],
            [0.5, 0.5, 0.1, 0.1, 0.51],
            [0.5, 0.5, 0.1, 0.1, 0.2],
        ]);
        let boxes = decode_candidates(&output, 3, 100, 100, 0.5, "crosswalk");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].score, 0.51);
    }

    #[test]
    fn reads_planes_not_interleaved_rows() {
        // Slot 1 is the only confident one; its geometry sits at index N+1 etc.
        let output = planes(&[
            [0.1, 0.1, 0.1, 0.1, 0.0],
            [0.75, 0.25, 0.5, 0.5, 0.8],
        ]);
        let boxes = decode_candidates(&output, 2, 100, 100, 0.5, "crosswalk");
        assert_eq!(boxes.len(), 1);
        assert_eq!(
            (boxes[0].x1, boxes[0].y1, boxes[0].x2, boxes[0].y2),
            (50.0, 0.0, 100.0, 50.0)
        );
    }

    #[test]
    fn nan_scores_and_geometry_are_dropped() {
        let output = planes(&[
            [0.5, 0.5, 0.1, 0.1, f32::NAN],
            [f32::NAN, 0.5, 0.1, 0.1, 0.9],
        ]);
        assert!(decode_candidates(&output, 2, 100, 100, 0.5, "crosswalk").is_empty());
    }

    #[test]
    fn short_output_yields_nothing() {
        let output = vec![0.9; 9];
        assert!(decode_candidates(&output, 2, 100, 100, 0.5, "crosswalk").is_empty());
    }

    #[test]
    fn shape_lengths() {
        let shape = ModelShape {
            width: 640,
            height: 640,
            candidates: 8400,
        };
        assert_eq!(shape.input_len(), 640 * 640 * 3);
        assert_eq!(shape.output_len(), 5 * 8400);
    }
}
