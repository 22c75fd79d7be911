use image::RgbImage;
use serde::Serialize;

/// Axis-aligned box in source-image pixel space.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Model confidence in [0, 1].
    pub score: f32,
    pub label: String,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, label: impl Into<String>) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
            score,
            label: label.into(),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Boxes found in one frame, plus the frame they were found in.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    /// Id of the telemetry frame this result belongs to.
    pub frame_id: u64,
    /// Decoded source frame, at its original resolution.
    pub frame: RgbImage,
    /// Surviving boxes, highest score first.
    pub boxes: Vec<BoundingBox>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn best(&self) -> Option<&BoundingBox> {
        self.boxes.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_orders_corners() {
        let b = BoundingBox::new(10.0, 8.0, 2.0, 4.0, 0.7, "crosswalk");
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (2.0, 4.0, 10.0, 8.0));
        assert_eq!(b.area(), 32.0);
    }
}
