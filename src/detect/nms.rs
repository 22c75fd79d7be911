//! Non-maximum suppression.

use super::result::BoundingBox;

/// Intersection over union. Returns 0 when both boxes have zero area.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let overlap_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = overlap_w * overlap_h;
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Greedy NMS.
///
/// Boxes are taken highest score first; every remaining box whose IoU with
/// the taken box is at or above `iou_threshold` is discarded. The output keeps
/// descending score order. Equal scores keep their input order.
pub fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept = Vec::with_capacity(boxes.len());
    let mut remaining = boxes;
    while !remaining.is_empty() {
        let best = remaining.remove(0);
        remaining.retain(|other| iou(&best, other) < iou_threshold);
        kept.push(best);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bx(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2, score, "crosswalk")
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bx(0.0, 0.0, 10.0, 10.0, 0.9);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bx(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = bx(20.0, 20.0, 30.0, 30.0, 0.9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_of_degenerate_boxes_is_zero() {
        let a = bx(5.0, 5.0, 5.0, 5.0, 0.9);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn suppresses_overlapping_lower_score() {
        let kept = non_max_suppression(
            vec![bx(1.0, 1.0, 10.0, 10.0, 0.8), bx(0.0, 0.0, 10.0, 10.0, 0.9)],
            0.5,
        );
        assert_eq!(kept, vec![bx(0.0, 0.0, 10.0, 10.0, 0.9)]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let high = bx(0.0, 0.0, 10.0, 10.0, 0.9);
        let low = bx(0.0, 0.0, 10.0, 5.0, 0.6);
        assert_eq!(iou(&high, &low), 0.5);
        let kept = non_max_suppression(vec![low, high.clone()], 0.5);
        assert_eq!(kept, vec![high]);
    }

    #[test]
    fn keeps_separate_clusters_in_score_order() {
        let kept = non_max_suppression(
            vec![
                bx(100.0, 100.0, 120.0, 120.0, 0.7),
                bx(0.0, 0.0, 10.0, 10.0, 0.95),
                bx(101.0, 101.0, 120.0, 120.0, 0.65),
                bx(1.0, 0.0, 10.0, 10.0, 0.6),
            ],
            0.5,
        );
        let scores: Vec<f32> = kept.iter().map(|b| b.score).collect();
        assert_eq!(scores, vec![0.95, 0.7]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(non_max_suppression(Vec::new(), 0.5).is_empty());
    }

    fn arb_box() -> impl Strategy<Value = BoundingBox> {
        (0.0f32..200.0, 0.0f32..200.0, 1.0f32..80.0, 1.0f32..80.0, 0.0f32..1.0)
            .prop_map(|(x, y, w, h, s)| bx(x, y, x + w, y + h, s))
    }

    proptest! {
        #[test]
        fn nms_is_idempotent(
            boxes in proptest::collection::vec(arb_box(), 0..40),
            threshold in 0.1f32..0.9,
        ) {
            let once = non_max_suppression(boxes, threshold);
            let twice = non_max_suppression(once.clone(), threshold);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn nms_output_is_sorted_descending(
            boxes in proptest::collection::vec(arb_box(), 0..40),
        ) {
            let kept = non_max_suppression(boxes, 0.5);
            prop_assert!(kept.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}
