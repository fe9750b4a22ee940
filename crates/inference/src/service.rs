use crate::{
    backend::InferenceBackend,
    gate::{FrameGate, GatePermit},
    pipeline::RecognitionPipeline,
    types::{Frame, FrameOutcome, FrameReport},
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing_opentelemetry::OpenTelemetrySpanExt;

struct PipelineMetrics {
    frame_duration: Histogram<f64>,
    frames_processed: Counter<u64>,
    frames_dropped: Counter<u64>,
    frames_failed: Counter<u64>,
    detections: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> PipelineMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.02, 0.03, 0.04, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0,
    ];

    PipelineMetrics {
        frame_duration: meter
            .f64_histogram("recognition_frame_duration_seconds")
            .with_description("Time to process a single frame (detection + recognition)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        frames_processed: meter
            .u64_counter("recognition_frames_total")
            .with_description("Total frames processed")
            .build(),
        frames_dropped: meter
            .u64_counter("recognition_frames_dropped_total")
            .with_description("Total frames dropped because a frame was already in flight")
            .build(),
        frames_failed: meter
            .u64_counter("recognition_frames_failed_total")
            .with_description("Total frames that failed in the pipeline")
            .build(),
        detections: meter
            .u64_counter("recognition_detections_total")
            .with_description("Total detections produced")
            .build(),
    }
}

impl PipelineMetrics {
    fn record(&self, report: &FrameReport) {
        let outcome = [KeyValue::new("outcome", report.outcome.as_str())];
        self.frame_duration
            .record(report.timings.total_ms / 1000.0, &outcome);
        self.frames_processed.add(1, &outcome);
        self.detections.add(report.results.len() as u64, &[]);
        if matches!(report.outcome, FrameOutcome::Failed { .. }) {
            self.frames_failed.add(1, &[]);
        }
    }
}

/// A frame admitted through the gate, carrying its permit to the worker.
struct Job {
    frame: Frame,
    permit: GatePermit,
}

/// Runs the pipeline on a dedicated worker thread, one frame at a time.
///
/// `submit` never blocks: a frame offered while another is in flight is
/// dropped. Each processed frame is published as a [`FrameReport`] once the
/// whole pipeline has finished with it. The snapshot channel holds only the
/// latest report; an unread one is replaced by the next.
pub struct InferenceService {
    gate: FrameGate,
    jobs: Option<Sender<Job>>,
    snapshots: Receiver<FrameReport>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
    frames_dropped: Counter<u64>,
}

impl InferenceService {
    pub fn spawn<B>(pipeline: RecognitionPipeline<B>) -> anyhow::Result<Self>
    where
        B: InferenceBackend + Send + 'static,
    {
        let metrics = init_metrics("inference");
        let frames_dropped = metrics.frames_dropped.clone();

        // The gate keeps at most one job outstanding, so one slot suffices.
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(1);
        let (snapshot_tx, snapshot_rx) = crossbeam_channel::bounded(1);
        let latest = Latest {
            tx: snapshot_tx,
            stale: snapshot_rx.clone(),
        };

        let worker = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || worker_loop(pipeline, job_rx, latest, metrics))?;

        tracing::info!("Inference service started");

        Ok(Self {
            gate: FrameGate::new(),
            jobs: Some(job_tx),
            snapshots: snapshot_rx,
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
            frames_dropped,
        })
    }

    /// Offer a frame. Returns `false` when it was dropped.
    pub fn submit(&self, frame: Frame) -> bool {
        let Some(permit) = self.gate.try_acquire() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            self.frames_dropped.add(1, &[]);
            tracing::trace!(sequence = frame.sequence, dropped, "Frame in flight, dropping");
            return false;
        };

        let Some(jobs) = &self.jobs else {
            return false;
        };

        match jobs.try_send(Job { frame, permit }) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Inference worker unavailable, dropping frame");
                false
            }
        }
    }

    /// Receiver of the most recent report not yet taken by any consumer.
    pub fn snapshots(&self) -> Receiver<FrameReport> {
        self.snapshots.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Finish the in-flight frame, stop the worker and close both sessions.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Inference worker panicked");
            }
            tracing::info!(dropped = self.dropped_frames(), "Inference service stopped");
        }
    }
}

impl Drop for InferenceService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single-slot hand-off of the newest report.
struct Latest {
    tx: Sender<FrameReport>,
    stale: Receiver<FrameReport>,
}

impl Latest {
    fn publish(&self, mut report: FrameReport) {
        loop {
            match self.tx.try_send(report) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(old) = self.stale.try_recv() {
                        tracing::trace!(sequence = old.sequence, "Replacing unread report");
                    }
                    report = rejected;
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("Snapshot receiver gone");
                    return;
                }
            }
        }
    }
}

fn worker_loop<B: InferenceBackend>(
    mut pipeline: RecognitionPipeline<B>,
    jobs: Receiver<Job>,
    snapshots: Latest,
    metrics: PipelineMetrics,
) {
    tracing::info!(status = %pipeline.status(), "Inference worker running");

    let mut frames_processed = 0u64;
    while let Ok(Job { frame, permit }) = jobs.recv() {
        let span = tracing::info_span!("inference_frame", sequence = frame.sequence);
        let report = span.in_scope(|| pipeline.process_frame(&frame));
        span.set_attribute("frame.outcome", report.outcome.as_str());
        span.set_attribute("frame.results", report.results.len() as i64);

        metrics.record(&report);
        frames_processed += 1;
        if frames_processed.is_multiple_of(30) {
            tracing::debug!(frames_processed, "Worker progress");
        }

        // Free the gate first so a consumer reacting to the report can submit.
        drop(permit);
        snapshots.publish(report);
    }

    pipeline.close();
    tracing::info!(frames_processed, "Inference worker exiting");
}
