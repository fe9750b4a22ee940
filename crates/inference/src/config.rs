use crate::processing::NmsStrategy;
use common::{env_or, env_or_valid};
use embeddings::{DEFAULT_EARLY_STOP, DEFAULT_EMBEDDING_DIM, DEFAULT_MATCH_THRESHOLD};
use preprocess::{DEFAULT_CROP_PADDING, DEFAULT_INPUT_SIZE, DEFAULT_RECOGNIZER_INPUT_SIZE};
use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub environment: Environment,
    pub detector_model_path: String,
    pub recognizer_model_path: String,
    pub reference_embeddings_path: String,
    pub input_glob: String,
    pub detector_input_size: u32,
    pub recognizer_input_size: u32,
    pub crop_padding: u32,
    pub embedding_dim: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub nms: NmsStrategy,
    pub match_threshold: f32,
    pub early_stop_threshold: Option<f32>,
    pub detector_accelerated: bool,
    pub recognizer_accelerated: bool,
    pub frame_interval_ms: u64,
    pub otel_endpoint: Option<String>,
}

impl InferenceConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let detector_model_path =
            env::var("DETECTOR_MODEL_PATH").unwrap_or_else(|_| "models/yolo11n.onnx".to_string());
        let recognizer_model_path = env::var("RECOGNIZER_MODEL_PATH")
            .unwrap_or_else(|_| "models/efficientnet_lite0.onnx".to_string());
        let reference_embeddings_path = env::var("REFERENCE_EMBEDDINGS_PATH")
            .unwrap_or_else(|_| "models/data.json".to_string());
        let input_glob = env::var("INPUT_GLOB").unwrap_or_else(|_| "frames/*.jpg".to_string());

        let early_stop_threshold = match env::var("EARLY_STOP_THRESHOLD") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
            _ => Some(unit_interval("EARLY_STOP_THRESHOLD", DEFAULT_EARLY_STOP)),
        };

        let otel_endpoint = env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty());

        Self {
            environment,
            detector_model_path,
            recognizer_model_path,
            reference_embeddings_path,
            input_glob,
            detector_input_size: positive("DETECTOR_INPUT_SIZE", DEFAULT_INPUT_SIZE),
            recognizer_input_size: positive("RECOGNIZER_INPUT_SIZE", DEFAULT_RECOGNIZER_INPUT_SIZE),
            crop_padding: env_or("CROP_PADDING", DEFAULT_CROP_PADDING),
            embedding_dim: positive("EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            confidence_threshold: unit_interval("CONFIDENCE_THRESHOLD", 0.80),
            iou_threshold: unit_interval("IOU_THRESHOLD", 0.45),
            nms: env_or("NMS_STRATEGY", NmsStrategy::Global),
            match_threshold: unit_interval("MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            early_stop_threshold,
            detector_accelerated: env_or("DETECTOR_ACCELERATED", false),
            recognizer_accelerated: env_or("RECOGNIZER_ACCELERATED", false),
            frame_interval_ms: env_or("FRAME_INTERVAL_MS", 33),
            otel_endpoint,
        }
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            detector_model_path: "/models/yolo11n.onnx".to_string(),
            recognizer_model_path: "/models/efficientnet_lite0.onnx".to_string(),
            reference_embeddings_path: "/models/data.json".to_string(),
            input_glob: "frames/*.jpg".to_string(),
            detector_input_size: DEFAULT_INPUT_SIZE,
            recognizer_input_size: DEFAULT_RECOGNIZER_INPUT_SIZE,
            crop_padding: DEFAULT_CROP_PADDING,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            confidence_threshold: 0.80,
            iou_threshold: 0.45,
            nms: NmsStrategy::Global,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            early_stop_threshold: Some(DEFAULT_EARLY_STOP),
            detector_accelerated: false,
            recognizer_accelerated: false,
            frame_interval_ms: 33,
            otel_endpoint: None,
        }
    }
}

/// Sizes and dimensions: zero would leave nothing to run on.
fn positive<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Debug + PartialOrd + Default,
{
    env_or_valid(key, default, |v| *v > T::default())
}

/// Scores and overlap ratios live in `[0, 1]`.
fn unit_interval(key: &str, default: f32) -> f32 {
    env_or_valid(key, default, |v| (0.0..=1.0).contains(v))
}
