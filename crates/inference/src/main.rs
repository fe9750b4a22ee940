use common::TelemetryGuard;
use embeddings::ReferenceTable;
use inference::{
    Frame, InferenceConfig, InferenceService, ModelSession, PipelineSettings, RecognitionPipeline,
    logging::setup_logging, source::ImageFileSource,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "ort-backend")]
use inference::backend::ort::{OrtBackend as Backend, OrtEnvironment};

#[cfg(not(feature = "ort-backend"))]
compile_error!("The 'ort-backend' feature must be enabled to build the inference binary");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = InferenceConfig::from_env();

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init(
            "inference",
            endpoint,
            config.environment,
        )?),
        None => {
            setup_logging(&config);
            None
        }
    };

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let env = OrtEnvironment::new("recognition")?;

    let mut detector = ModelSession::<Backend>::new("detector");
    if let Err(e) = detector.initialize_from_file(
        &env,
        &config.detector_model_path,
        config.detector_accelerated,
    ) {
        tracing::error!(error = %e, "Detector unavailable, frames will be skipped");
    }

    let mut recognizer = ModelSession::<Backend>::new("recognizer");
    if let Err(e) = recognizer.initialize_from_file(
        &env,
        &config.recognizer_model_path,
        config.recognizer_accelerated,
    ) {
        tracing::error!(error = %e, "Recognizer unavailable, frames will be skipped");
    }

    let references =
        match ReferenceTable::load(&config.reference_embeddings_path, config.embedding_dim) {
            Ok(table) => Some(Arc::new(table)),
            Err(e) => {
                tracing::warn!(error = %e, "Reference table unavailable, running detection only");
                None
            }
        };

    let pipeline = RecognitionPipeline::new(detector, recognizer, PipelineSettings::from(&config))
        .with_references(references);
    tracing::info!(status = %pipeline.status(), "Pipeline initialized");

    let service = InferenceService::spawn(pipeline)?;

    let snapshots = service.snapshots();
    let printer = std::thread::spawn(move || {
        for report in snapshots.iter() {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize frame report"),
            }
        }
    });

    let interval = Duration::from_millis(config.frame_interval_ms);
    let mut sequence = 0u64;
    for (path, image) in ImageFileSource::new(&config.input_glob)? {
        match image {
            Ok(image) => {
                if !service.submit(Frame::new(sequence, image)) {
                    tracing::debug!(path = %path.display(), "Frame dropped");
                }
                sequence += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read image"),
        }
        tokio::time::sleep(interval).await;
    }

    let dropped = service.dropped_frames();
    service.shutdown();
    if printer.join().is_err() {
        tracing::error!("Report printer panicked");
    }

    tracing::info!(frames = sequence, dropped, "Input exhausted, exiting");
    Ok(())
}
