use crate::types::Detection;
use std::str::FromStr;

/// Greedy non-maximum suppression.
///
/// Sorts by confidence (stable, descending), then keeps each detection whose
/// IoU with every already kept one is at most `iou_threshold`. Survivors stay
/// in confidence order.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept)
            .any(|prev| detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold);
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsStrategy {
    /// Suppress across all classes.
    #[default]
    Global,
    /// Suppress only within a class.
    PerClass,
}

impl NmsStrategy {
    pub fn apply(&self, mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
        match self {
            NmsStrategy::Global => {
                non_max_suppression(&mut detections, iou_threshold);
                detections
            }
            NmsStrategy::PerClass => {
                let mut groups: Vec<(usize, Vec<Detection>)> = Vec::new();
                for det in detections {
                    match groups.iter_mut().find(|(class_id, _)| *class_id == det.class_id) {
                        Some((_, group)) => group.push(det),
                        None => groups.push((det.class_id, vec![det])),
                    }
                }

                let mut merged = Vec::new();
                for (_, mut group) in groups {
                    non_max_suppression(&mut group, iou_threshold);
                    merged.extend(group);
                }
                merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                merged
            }
        }
    }
}

impl FromStr for NmsStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "global" => Ok(NmsStrategy::Global),
            "per_class" | "per-class" | "perclass" => Ok(NmsStrategy::PerClass),
            other => Err(format!("unknown NMS strategy '{other}'")),
        }
    }
}
