use super::nms::NmsStrategy;
use crate::errors::PipelineError;
use crate::types::Detection;
use common::BoundingBox;
use ndarray::{Ix3, s};
use preprocess::{LetterboxTransform, Tensor};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.80;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Decodes YOLO-style detector output of shape `(1, 4 + C, N)`: per proposal
/// a `cx, cy, w, h` box in letterboxed pixels followed by `C` class scores.
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub class_names: Vec<String>,
    pub nms: NmsStrategy,
}

impl Default for DetectionDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD)
    }
}

impl DetectionDecoder {
    pub fn new(confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            class_names: vec!["card".to_string()],
            nms: NmsStrategy::Global,
        }
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    pub fn with_nms(mut self, nms: NmsStrategy) -> Self {
        self.nms = nms;
        self
    }

    /// Threshold, convert and un-letterbox every proposal, then suppress
    /// overlaps. Results are in source image pixels, highest confidence
    /// first.
    #[tracing::instrument(skip(self, output, transform))]
    pub fn decode(
        &self,
        output: &Tensor,
        transform: &LetterboxTransform,
    ) -> Result<Vec<Detection>, PipelineError> {
        let shape = output.shape().to_vec();
        let output = output
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|_| PipelineError::InvalidOutputShape {
                actual: shape.clone(),
            })?;
        if shape[0] != 1 || shape[1] < 5 {
            return Err(PipelineError::InvalidOutputShape { actual: shape });
        }

        let num_proposals = shape[2];
        let mut detections = Vec::new();

        for i in 0..num_proposals {
            let scores = output.slice(s![0, 4.., i]);

            let mut class_id = 0usize;
            let mut confidence = f32::NEG_INFINITY;
            for (c, &score) in scores.iter().enumerate() {
                if score > confidence {
                    confidence = score;
                    class_id = c;
                }
            }

            if confidence.is_nan() || confidence < self.confidence_threshold {
                continue;
            }

            let letterboxed = BoundingBox::from_cxcywh(
                output[[0, 0, i]],
                output[[0, 1, i]],
                output[[0, 2, i]],
                output[[0, 3, i]],
            );

            detections.push(Detection {
                bbox: transform.to_original(&letterboxed),
                confidence,
                class_id,
                class_name: self.class_name(class_id),
            });
        }

        let candidates = detections.len();
        let detections = self.nms.apply(detections, self.iou_threshold);

        tracing::trace!(
            num_proposals,
            candidates,
            kept = detections.len(),
            "Decoded detections"
        );

        Ok(detections)
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}
