use std::io::Cursor;

use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};

use pathpal_core::detect::{
    non_max_suppression, BoundingBox, DetectionParams, DetectionPipeline, ModelShape, StubBackend,
};
use pathpal_core::ImagePayload;

const SHAPE: ModelShape = ModelShape {
    width: 16,
    height: 16,
    candidates: 4,
};

fn encode(width: u32, height: u32, format: ImageFormat) -> ImagePayload {
    let img = RgbImage::from_pixel(width, height, Rgb([40, 90, 200]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, format).expect("encode image");
    ImagePayload::new(base64::engine::general_purpose::STANDARD.encode(bytes.into_inner()))
}

/// Lay `(cx, cy, w, h, score)` candidates out as five parallel planes.
fn planes(candidates: &[[f32; 5]]) -> Vec<f32> {
    let n = candidates.len();
    let mut out = vec![0.0; 5 * n];
    for (slot, c) in candidates.iter().enumerate() {
        for (plane, value) in c.iter().enumerate() {
            out[plane * n + slot] = *value;
        }
    }
    out
}

fn pipeline(output: Vec<f32>, params: DetectionParams) -> DetectionPipeline {
    DetectionPipeline::new(Box::new(StubBackend::new(SHAPE).with_output(output)), params)
}

#[test]
fn overlapping_candidates_collapse_to_best_per_cluster() {
    let output = planes(&[
        [0.25, 0.25, 0.2, 0.2, 0.7],
        [0.75, 0.75, 0.2, 0.2, 0.95],
        [0.26, 0.25, 0.2, 0.2, 0.9],
        [0.5, 0.5, 0.1, 0.1, 0.4],
    ]);
    let result = pipeline(output, DetectionParams::default())
        .process(11, &encode(100, 200, ImageFormat::Png))
        .expect("detection");

    assert_eq!(result.frame_id, 11);
    assert_eq!(result.frame.dimensions(), (100, 200));
    let scores: Vec<f32> = result.boxes.iter().map(|b| b.score).collect();
    assert_eq!(scores, vec![0.95, 0.9]);

    let top = &result.boxes[0];
    assert!((top.x1 - 65.0).abs() < 1e-3);
    assert!((top.y1 - 130.0).abs() < 1e-3);
    assert!((top.x2 - 85.0).abs() < 1e-3);
    assert!((top.y2 - 170.0).abs() < 1e-3);
    assert!(result.boxes.iter().all(|b| b.label == "crosswalk"));
    assert_eq!(result.best().map(|b| b.score), Some(0.95));
}

#[test]
fn thresholds_and_label_are_tunable() {
    let output = planes(&[
        [0.25, 0.25, 0.2, 0.2, 0.7],
        [0.26, 0.25, 0.2, 0.2, 0.9],
        [0.5, 0.5, 0.1, 0.1, 0.4],
        [0.0, 0.0, 0.0, 0.0, 0.0],
    ]);
    let params = DetectionParams {
        confidence_threshold: 0.3,
        iou_threshold: 0.99,
        label: "zebra".to_string(),
    };
    let result = pipeline(output, params)
        .process(1, &encode(64, 64, ImageFormat::Png))
        .expect("detection");

    let scores: Vec<f32> = result.boxes.iter().map(|b| b.score).collect();
    assert_eq!(scores, vec![0.9, 0.7, 0.4]);
    assert!(result.boxes.iter().all(|b| b.label == "zebra"));
}

#[test]
fn jpeg_payloads_decode() {
    let result = pipeline(vec![0.0; SHAPE.output_len()], DetectionParams::default())
        .process(2, &encode(48, 32, ImageFormat::Jpeg))
        .expect("detection");
    assert_eq!(result.frame.dimensions(), (48, 32));
    assert!(result.is_empty());
}

#[test]
fn undecodable_payloads_fail_the_frame() {
    let pipeline = pipeline(vec![0.0; SHAPE.output_len()], DetectionParams::default());
    assert!(pipeline.process(3, &ImagePayload::new("%%%")).is_err());
    assert!(pipeline.process(4, &ImagePayload::new("AAAA")).is_err());
}

#[test]
fn failing_backend_fails_the_frame() {
    let pipeline = DetectionPipeline::new(
        Box::new(StubBackend::new(SHAPE).failing()),
        DetectionParams::default(),
    );
    let err = pipeline
        .process(5, &encode(16, 16, ImageFormat::Png))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("inference failed"));
}

#[test]
fn nms_keeps_higher_score_of_overlapping_pair() {
    let boxes = vec![
        BoundingBox::new(1.0, 1.0, 10.0, 10.0, 0.8, "crosswalk"),
        BoundingBox::new(0.0, 0.0, 10.0, 10.0, 0.9, "crosswalk"),
    ];
    let kept = non_max_suppression(boxes, 0.5);
    assert_eq!(
        kept,
        vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0, 0.9, "crosswalk")]
    );
}
