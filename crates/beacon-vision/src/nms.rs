use std::collections::BTreeMap;

use crate::{Detection, Rect};

pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let iw = overlap(a.x0, a.x1, b.x0, b.x1);
    let ih = overlap(a.y0, a.y1, b.y0, b.y1);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn overlap(a0: f32, a1: f32, b0: f32, b1: f32) -> f32 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

/// Greedy per-class suppression. Classes never suppress each other.
///
/// Within a class, candidates are visited by descending confidence (stable, so
/// equal confidences keep insertion order); each survivor removes the
/// remaining candidates whose IoU with it reaches `iou_th`. Output is grouped
/// by ascending class id.
pub fn suppress(dets: Vec<Detection>, iou_th: f32) -> Vec<Detection> {
    let mut by_class: BTreeMap<usize, Vec<Detection>> = BTreeMap::new();
    for d in dets {
        by_class.entry(d.class_id).or_default().push(d);
    }

    let mut kept = Vec::new();
    for (_, mut group) in by_class {
        group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut accepted: Vec<Detection> = Vec::new();
        'outer: for d in group {
            for k in &accepted {
                if iou(&d.rect, &k.rect) >= iou_th {
                    continue 'outer;
                }
            }
            accepted.push(d);
        }
        kept.extend(accepted);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, conf: f32, rect: Rect) -> Detection {
        Detection { class_id, label: format!("c{class_id}"), confidence: conf, rect, distance_m: None }
    }

    #[test]
    fn iou_of_identical_and_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &Rect::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        let half = Rect::new(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn zero_area_union_is_zero() {
        let p = Rect::new(3.0, 3.0, 3.0, 3.0);
        assert_eq!(iou(&p, &p), 0.0);
    }

    #[test]
    fn overlapping_same_class_keeps_most_confident() {
        // 100x100 boxes shifted by 15: IoU = 85*100 / (20000 - 8500) ~ 0.739
        let a = det(2, 0.6, Rect::new(15.0, 0.0, 115.0, 100.0));
        let b = det(2, 0.9, Rect::new(0.0, 0.0, 100.0, 100.0));
        let out = suppress(vec![a, b], 0.6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 0.9);
    }

    #[test]
    fn other_classes_are_not_suppressed() {
        let r = Rect::new(0.0, 0.0, 50.0, 50.0);
        let out = suppress(vec![det(0, 0.9, r), det(1, 0.8, r)], 0.6);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn threshold_is_inclusive() {
        // IoU exactly 0.5
        let a = det(0, 0.9, Rect::new(0.0, 0.0, 30.0, 10.0));
        let b = det(0, 0.8, Rect::new(10.0, 0.0, 40.0, 10.0));
        assert_eq!(suppress(vec![a.clone(), b.clone()], 0.5).len(), 1);
        assert_eq!(suppress(vec![a, b], 0.51).len(), 2);
    }

    #[test]
    fn equal_confidence_keeps_insertion_order() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        let first = Detection { label: "first".into(), ..det(0, 0.7, r) };
        let second = Detection { label: "second".into(), ..det(0, 0.7, r) };
        let out = suppress(vec![first, second], 0.6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "first");
    }
}
