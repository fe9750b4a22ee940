use crate::session::SessionStatus;
use common::BoundingBox;
use image::RgbImage;
use serde::Serialize;
use std::fmt;

/// One camera frame handed to the pipeline.
///
/// Pixels stay in sensor orientation; `rotation_degrees` is carried through to
/// the report so the presentation layer can rotate boxes for display.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub image: RgbImage,
    pub rotation_degrees: u32,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            image,
            rotation_degrees: 0,
        }
    }

    pub fn with_rotation(mut self, rotation_degrees: u32) -> Self {
        self.rotation_degrees = rotation_degrees % 360;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: usize,
    pub class_name: String,
}

/// Detection plus its best reference category, in source image pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub bbox: BoundingBox,
    pub detection_confidence: f32,
    pub class_name: String,
    pub category: Option<String>,
    pub similarity: f32,
}

impl RecognitionResult {
    /// Result for a detection that never reached the recognizer.
    pub fn detection_only(detection: Detection) -> Self {
        Self {
            bbox: detection.bbox,
            detection_confidence: detection.confidence,
            class_name: detection.class_name,
            category: None,
            similarity: 0.0,
        }
    }

    pub fn label(&self) -> &str {
        self.category.as_deref().unwrap_or(embeddings::UNKNOWN_LABEL)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FrameOutcome {
    Completed,
    Skipped { reason: String },
    Failed { reason: String },
}

impl FrameOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameOutcome::Completed => "completed",
            FrameOutcome::Skipped { .. } => "skipped",
            FrameOutcome::Failed { .. } => "failed",
        }
    }
}

/// Whether the frame ran recognition or stopped after detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Full,
    DetectionOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameTimings {
    pub detection_ms: f64,
    pub recognition_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceSummary {
    pub categories: usize,
    pub embeddings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub detector: SessionStatus,
    pub recognizer: SessionStatus,
    pub references: Option<ReferenceSummary>,
}

impl PipelineStatus {
    /// Recognition needs a reference table to match against.
    pub fn mode(&self) -> PipelineMode {
        if self.references.is_some() {
            PipelineMode::Full
        } else {
            PipelineMode::DetectionOnly
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | references: ", self.detector, self.recognizer)?;
        match &self.references {
            Some(r) => write!(f, "{} categories, {} embeddings", r.categories, r.embeddings),
            None => write!(f, "unavailable"),
        }
    }
}

/// Immutable per-frame hand-off to whoever presents results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub outcome: FrameOutcome,
    pub mode: PipelineMode,
    pub results: Vec<RecognitionResult>,
    pub timings: FrameTimings,
    pub image_width: u32,
    pub image_height: u32,
    pub rotation_degrees: u32,
    pub status: PipelineStatus,
}

impl FrameReport {
    pub fn is_completed(&self) -> bool {
        self.outcome == FrameOutcome::Completed
    }
}
