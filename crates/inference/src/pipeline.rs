use crate::backend::InferenceBackend;
use crate::config::InferenceConfig;
use crate::errors::PipelineError;
use crate::processing::DetectionDecoder;
use crate::session::ModelSession;
use crate::types::{
    Detection, Frame, FrameOutcome, FrameReport, FrameTimings, PipelineMode, PipelineStatus,
    RecognitionResult, ReferenceSummary,
};
use common::span_debug;
use embeddings::{EmbeddingMatcher, ReferenceTable};
use image::RgbImage;
use preprocess::{
    CropRegion, DEFAULT_CROP_PADDING, DEFAULT_INPUT_SIZE, DEFAULT_RECOGNIZER_INPUT_SIZE,
    LetterboxPreProcessor, RecognizerPreProcessor,
};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Input tensor name of the detector graph.
pub const DETECTOR_INPUT_NAME: &str = "images";
/// Input tensor name of the recognizer graph.
pub const RECOGNIZER_INPUT_NAME: &str = "input";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub detector_input_size: u32,
    pub recognizer_input_size: u32,
    pub crop_padding: u32,
    pub decoder: DetectionDecoder,
    pub matcher: EmbeddingMatcher,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detector_input_size: DEFAULT_INPUT_SIZE,
            recognizer_input_size: DEFAULT_RECOGNIZER_INPUT_SIZE,
            crop_padding: DEFAULT_CROP_PADDING,
            decoder: DetectionDecoder::default(),
            matcher: EmbeddingMatcher::default(),
        }
    }
}

impl From<&InferenceConfig> for PipelineSettings {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            detector_input_size: config.detector_input_size,
            recognizer_input_size: config.recognizer_input_size,
            crop_padding: config.crop_padding,
            decoder: DetectionDecoder::new(config.confidence_threshold, config.iou_threshold)
                .with_nms(config.nms),
            matcher: EmbeddingMatcher::new(config.match_threshold, config.early_stop_threshold),
        }
    }
}

/// Detection followed by per-crop recognition for one frame at a time.
///
/// Frames are skipped outright unless both sessions are ready. Without a
/// reference table the recognition stage is disabled and frames come back
/// with detection-only results.
pub struct RecognitionPipeline<B: InferenceBackend> {
    detector: ModelSession<B>,
    recognizer: ModelSession<B>,
    references: Option<Arc<ReferenceTable>>,
    letterbox: LetterboxPreProcessor,
    crop: RecognizerPreProcessor,
    decoder: DetectionDecoder,
    matcher: EmbeddingMatcher,
}

impl<B: InferenceBackend> RecognitionPipeline<B> {
    pub fn new(
        detector: ModelSession<B>,
        recognizer: ModelSession<B>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            detector,
            recognizer,
            references: None,
            letterbox: LetterboxPreProcessor::new(settings.detector_input_size),
            crop: RecognizerPreProcessor::new(
                settings.recognizer_input_size,
                settings.crop_padding,
            ),
            decoder: settings.decoder,
            matcher: settings.matcher,
        }
    }

    pub fn with_references(mut self, references: Option<Arc<ReferenceTable>>) -> Self {
        self.references = references;
        self
    }

    pub fn set_references(&mut self, references: Option<Arc<ReferenceTable>>) {
        self.references = references;
    }

    pub fn detector(&self) -> &ModelSession<B> {
        &self.detector
    }

    pub fn recognizer(&self) -> &ModelSession<B> {
        &self.recognizer
    }

    pub fn detector_mut(&mut self) -> &mut ModelSession<B> {
        &mut self.detector
    }

    pub fn recognizer_mut(&mut self) -> &mut ModelSession<B> {
        &mut self.recognizer
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            detector: self.detector.status(),
            recognizer: self.recognizer.status(),
            references: self.references.as_ref().map(|table| ReferenceSummary {
                categories: table.category_count(),
                embeddings: table.embedding_count(),
            }),
        }
    }

    /// Release both model sessions.
    pub fn close(&mut self) {
        self.detector.close();
        self.recognizer.close();
    }

    /// Run one frame to completion. Any stage error, or a panic inside a
    /// stage, yields a `Failed` report with no results.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let span = tracing::info_span!(
            "process_frame",
            sequence = frame.sequence,
            width = frame.image.width(),
            height = frame.image.height()
        );
        let _enter = span.enter();

        let start = Instant::now();
        let status = self.status();
        let mode = status.mode();
        let mut timings = FrameTimings::default();

        let (outcome, results) = if let Some(session) = self.unready_session() {
            debug!(
                model = session.model(),
                state = %session.state(),
                "Session not ready, skipping frame"
            );
            (
                FrameOutcome::Skipped {
                    reason: format!("{} {}", session.model(), session.state()),
                },
                Vec::new(),
            )
        } else {
            let stages = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_stages(&frame.image, mode, &mut timings)
            }));
            match stages {
                Ok(Ok(results)) => (FrameOutcome::Completed, results),
                Ok(Err(e)) => {
                    warn!(error = %e, "Frame processing failed");
                    (
                        FrameOutcome::Failed {
                            reason: e.to_string(),
                        },
                        Vec::new(),
                    )
                }
                Err(payload) => {
                    let reason = format!("panic: {}", panic_message(payload.as_ref()));
                    tracing::error!(reason, "Frame processing panicked");
                    (FrameOutcome::Failed { reason }, Vec::new())
                }
            }
        };

        timings.total_ms = millis(start.elapsed());
        debug!(
            outcome = outcome.as_str(),
            results = results.len(),
            total_ms = timings.total_ms,
            "Frame processed"
        );

        FrameReport {
            sequence: frame.sequence,
            outcome,
            mode,
            results,
            timings,
            image_width: frame.image.width(),
            image_height: frame.image.height(),
            rotation_degrees: frame.rotation_degrees,
            status,
        }
    }

    /// The first model session that cannot run, if any.
    fn unready_session(&self) -> Option<&ModelSession<B>> {
        [&self.detector, &self.recognizer]
            .into_iter()
            .find(|session| !session.is_ready())
    }

    fn run_stages(
        &mut self,
        image: &RgbImage,
        mode: PipelineMode,
        timings: &mut FrameTimings,
    ) -> Result<Vec<RecognitionResult>, PipelineError> {
        let start = Instant::now();
        let detections = self.detect(image)?;
        timings.detection_ms = millis(start.elapsed());

        let table = match (mode, &self.references) {
            (PipelineMode::Full, Some(table)) if !detections.is_empty() => Arc::clone(table),
            _ => {
                return Ok(detections
                    .into_iter()
                    .map(RecognitionResult::detection_only)
                    .collect());
            }
        };

        let start = Instant::now();
        let results = self.recognize(image, detections, &table)?;
        timings.recognition_ms = millis(start.elapsed());
        Ok(results)
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, PipelineError> {
        let _s = span_debug!("detect");

        let pre = self.letterbox.preprocess(image)?;
        let output = self.detector.run(&[(DETECTOR_INPUT_NAME, &pre.tensor)])?;
        let tensor = output
            .primary()
            .ok_or_else(|| PipelineError::MissingOutput {
                model: self.detector.model().to_string(),
            })?;

        self.decoder.decode(tensor, &pre.transform)
    }

    fn recognize(
        &mut self,
        image: &RgbImage,
        detections: Vec<Detection>,
        table: &ReferenceTable,
    ) -> Result<Vec<RecognitionResult>, PipelineError> {
        let _s = span_debug!("recognize");

        let (width, height) = image.dimensions();
        let mut results = Vec::with_capacity(detections.len());

        for detection in detections {
            let Some(region) = CropRegion::from_bbox(&detection.bbox, width, height) else {
                debug!(bbox = ?detection.bbox, "Zero-area crop, skipping detection");
                continue;
            };

            let tensor = self
                .crop
                .preprocess_region(image.as_raw(), width, height, region)?;
            let output = self.recognizer.run(&[(RECOGNIZER_INPUT_NAME, &tensor)])?;
            let embedding = output
                .primary()
                .ok_or_else(|| PipelineError::MissingOutput {
                    model: self.recognizer.model().to_string(),
                })?;

            if embedding.len() != table.dimension() {
                return Err(PipelineError::EmbeddingSize {
                    expected: table.dimension(),
                    actual: embedding.len(),
                });
            }

            let embedding: Vec<f32> = embedding.iter().copied().collect();
            let matched = self.matcher.find_best_match(&embedding, table);

            results.push(RecognitionResult {
                bbox: detection.bbox,
                detection_confidence: detection.confidence,
                class_name: detection.class_name,
                category: matched.category,
                similarity: matched.similarity,
            });
        }

        Ok(results)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ExecutionProvider, InferenceOutput};
    use crate::session::SessionState;
    use common::BoundingBox;
    use ndarray::{Array, IxDyn};
    use preprocess::Tensor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DETECTOR: &[u8] = b"detector";
    const RECOGNIZER: &[u8] = b"recognizer";

    /// Canned outputs shared by both fake models.
    #[derive(Clone)]
    struct Script {
        detector_output: Tensor,
        embedding: Tensor,
        detector_calls: Arc<AtomicUsize>,
        recognizer_calls: Arc<AtomicUsize>,
        recognizer_panics: bool,
    }

    impl Script {
        fn new(detector_output: Tensor, embedding: Vec<f32>) -> Self {
            let dim = embedding.len();
            Self {
                detector_output,
                embedding: Array::from_shape_vec(IxDyn(&[1, dim]), embedding).unwrap(),
                detector_calls: Arc::new(AtomicUsize::new(0)),
                recognizer_calls: Arc::new(AtomicUsize::new(0)),
                recognizer_panics: false,
            }
        }
    }

    struct ScriptedBackend {
        is_detector: bool,
        script: Script,
    }

    impl InferenceBackend for ScriptedBackend {
        type Environment = Script;

        fn load(env: &Script, model: &[u8], _: ExecutionProvider) -> anyhow::Result<Self> {
            Ok(Self {
                is_detector: model == DETECTOR,
                script: env.clone(),
            })
        }

        fn run(&mut self, inputs: &[(&str, &Tensor)]) -> anyhow::Result<InferenceOutput> {
            let (name, tensor) = inputs[0];
            if self.is_detector {
                anyhow::ensure!(name == DETECTOR_INPUT_NAME, "unexpected input {name}");
                anyhow::ensure!(tensor.shape() == [1, 3, 64, 64], "bad detector input");
                self.script.detector_calls.fetch_add(1, Ordering::SeqCst);
                Ok(InferenceOutput::single("output0", self.script.detector_output.clone()))
            } else {
                anyhow::ensure!(name == RECOGNIZER_INPUT_NAME, "unexpected input {name}");
                anyhow::ensure!(tensor.shape() == [1, 3, 8, 8], "bad recognizer input");
                self.script.recognizer_calls.fetch_add(1, Ordering::SeqCst);
                if self.script.recognizer_panics {
                    panic!("embedding buffer overrun");
                }
                Ok(InferenceOutput::single("embedding", self.script.embedding.clone()))
            }
        }
    }

    /// `(1, 5, N)` single-class detector output.
    fn detector_output(boxes: &[[f32; 5]]) -> Tensor {
        let mut out = Array::zeros(IxDyn(&[1, 5, boxes.len()]));
        for (i, b) in boxes.iter().enumerate() {
            for (k, v) in b.iter().enumerate() {
                out[[0, k, i]] = *v;
            }
        }
        out
    }

    /// A 20px box centered in the 64px input.
    fn one_card(score: f32) -> Tensor {
        detector_output(&[[32.0, 32.0, 20.0, 20.0, score]])
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            detector_input_size: 64,
            recognizer_input_size: 8,
            crop_padding: 4,
            ..PipelineSettings::default()
        }
    }

    fn build_pipeline(
        script: &Script,
        detector_ready: bool,
        recognizer_ready: bool,
    ) -> RecognitionPipeline<ScriptedBackend> {
        let mut detector = ModelSession::new("detector");
        if detector_ready {
            detector.initialize(script, DETECTOR, false).unwrap();
        }
        let mut recognizer = ModelSession::new("recognizer");
        if recognizer_ready {
            recognizer.initialize(script, RECOGNIZER, false).unwrap();
        }
        RecognitionPipeline::new(detector, recognizer, settings())
    }

    fn table() -> Arc<ReferenceTable> {
        Arc::new(ReferenceTable::from_categories(
            3,
            [
                ("ace_of_spades", vec![vec![1.0, 0.0, 0.0]]),
                ("queen_of_hearts", vec![vec![0.0, 1.0, 0.0]]),
            ],
        ))
    }

    fn frame() -> Frame {
        Frame::new(7, RgbImage::from_pixel(64, 64, image::Rgb([90, 120, 200]))).with_rotation(90)
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = InferenceConfig::test_default();
        config.confidence_threshold = 0.6;
        config.early_stop_threshold = None;

        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.detector_input_size, 640);
        assert_eq!(settings.decoder.confidence_threshold, 0.6);
        assert_eq!(settings.matcher.early_stop, None);
    }

    #[test]
    fn test_detector_not_ready_skips_frame() {
        let script = Script::new(one_card(0.9), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, false, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert_eq!(
            report.outcome,
            FrameOutcome::Skipped {
                reason: "detector uninitialized".to_string()
            }
        );
        assert!(report.results.is_empty());
        assert_eq!(script.detector_calls.load(Ordering::SeqCst), 0);
        assert_eq!(script.recognizer_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_full_recognition() {
        let script = Script::new(one_card(0.9), vec![0.0, 2.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert!(report.is_completed());
        assert_eq!(report.mode, PipelineMode::Full);
        assert_eq!(report.sequence, 7);
        assert_eq!(report.rotation_degrees, 90);
        assert_eq!((report.image_width, report.image_height), (64, 64));

        assert_eq!(report.results.len(), 1);
        let result = &report.results[0];
        assert_eq!(result.category.as_deref(), Some("queen_of_hearts"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert_eq!(result.class_name, "card");
        assert_eq!(result.bbox, BoundingBox::new(22.0, 22.0, 42.0, 42.0));
        assert!(report.timings.total_ms >= report.timings.detection_ms);
    }

    #[test]
    fn test_no_detections_completes_empty() {
        let script = Script::new(one_card(0.1), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert!(report.is_completed());
        assert!(report.results.is_empty());
        assert_eq!(script.recognizer_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_references_is_detection_only() {
        let script = Script::new(one_card(0.9), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true);

        let report = pipeline.process_frame(&frame());
        assert!(report.is_completed());
        assert_eq!(report.mode, PipelineMode::DetectionOnly);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].category, None);
        assert_eq!(report.results[0].label(), "Unknown");
        assert_eq!(script.recognizer_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recognizer_not_ready_skips_frame() {
        let script = Script::new(one_card(0.9), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, false).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert_eq!(
            report.outcome,
            FrameOutcome::Skipped {
                reason: "recognizer uninitialized".to_string()
            }
        );
        assert_eq!(report.status.recognizer.state, SessionState::Uninitialized);
        assert!(report.results.is_empty());
        assert_eq!(script.detector_calls.load(Ordering::SeqCst), 0, "No partial pipeline runs");
    }

    #[test]
    fn test_zero_area_crop_skips_only_that_detection() {
        // The second box truncates to a zero-width crop.
        let script = Script::new(
            detector_output(&[[20.0, 20.0, 16.0, 16.0, 0.9], [50.5, 50.0, 0.5, 10.0, 0.85]]),
            vec![1.0, 0.0, 0.0],
        );
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert!(report.is_completed());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].category.as_deref(), Some("ace_of_spades"));
        assert_eq!(script.recognizer_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_detector_output_fails_frame() {
        let script = Script::new(Array::zeros(IxDyn(&[1, 3, 10])), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert!(matches!(report.outcome, FrameOutcome::Failed { .. }));
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_embedding_size_mismatch_fails_frame() {
        let script = Script::new(one_card(0.9), vec![1.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        match report.outcome {
            FrameOutcome::Failed { reason } => assert!(reason.contains("Embedding size mismatch")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_panicking_stage_fails_frame_and_pipeline_recovers() {
        let mut script = Script::new(one_card(0.9), vec![1.0, 0.0, 0.0]);
        script.recognizer_panics = true;
        let mut pipeline = build_pipeline(&script, true, true).with_references(Some(table()));

        let report = pipeline.process_frame(&frame());
        assert_eq!(
            report.outcome,
            FrameOutcome::Failed {
                reason: "panic: embedding buffer overrun".to_string()
            }
        );
        assert!(report.results.is_empty());

        // Detection alone still runs on the same pipeline afterwards.
        pipeline.set_references(None);
        let report = pipeline.process_frame(&frame());
        assert!(report.is_completed());
        assert_eq!(report.results.len(), 1);
    }

    #[test]
    fn test_panic_message_from_payload() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let literal: Box<dyn Any + Send> = Box::new("literal");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(literal.as_ref()), "literal");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[test]
    fn test_closed_pipeline_skips() {
        let script = Script::new(one_card(0.9), vec![1.0, 0.0, 0.0]);
        let mut pipeline = build_pipeline(&script, true, true);
        pipeline.close();

        let report = pipeline.process_frame(&frame());
        assert!(matches!(report.outcome, FrameOutcome::Skipped { .. }));
        assert_eq!(report.status.detector.state, SessionState::Uninitialized);
    }

    #[test]
    fn test_status_text() {
        let script = Script::new(detector_output(&[]), vec![1.0, 0.0, 0.0]);
        let pipeline = build_pipeline(&script, true, false).with_references(Some(table()));
        assert_eq!(
            pipeline.status().to_string(),
            "detector: ready (CPU) | recognizer: uninitialized | references: 2 categories, 2 embeddings"
        );
    }
}
