use crate::{
    decoder::{DecodeError, FrameDecoder},
    labels::LabelSet,
    model::{Classification, Classifier, InferenceError},
    queue::{FrameReceiver, FrameTask},
    session::{SessionId, SessionRegistry},
    telemetry::{self, Metrics},
};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::instrument;

/// Outcome of one processed frame. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub frame_id: Value,
    pub label: String,
    pub confidence: f32,
}

impl DetectionResult {
    pub fn text(&self) -> String {
        format!("{} (confidence: {:.2})", self.label, self.confidence)
    }
}

/// Receives results from the worker. Delivery is best-effort: a sink must
/// silently ignore sessions it can no longer reach.
pub trait ResultSink: Send + Sync + 'static {
    fn deliver(&self, session: SessionId, result: DetectionResult);
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl FrameError {
    fn stage(&self) -> &'static str {
        match self {
            FrameError::Decode(_) => telemetry::STAGE_DECODE,
            FrameError::Inference(_) => telemetry::STAGE_INFERENCE,
            FrameError::Worker(_) => telemetry::STAGE_WORKER,
        }
    }
}

/// The single consumer of the frame queue.
///
/// Tasks are processed one at a time in queue order, so results for a
/// session reach the sink in the order its frames were submitted.
pub struct FrameWorker<D: FrameDecoder, C: Classifier, S: ResultSink> {
    receiver: FrameReceiver,
    registry: Arc<SessionRegistry>,
    decoder: Arc<D>,
    classifier: Arc<C>,
    labels: Arc<LabelSet>,
    sink: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<D: FrameDecoder, C: Classifier, S: ResultSink> FrameWorker<D, C, S> {
    pub fn new(
        receiver: FrameReceiver,
        registry: Arc<SessionRegistry>,
        decoder: Arc<D>,
        classifier: Arc<C>,
        labels: Arc<LabelSet>,
        sink: Arc<S>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            receiver,
            registry,
            decoder,
            classifier,
            labels,
            sink,
            metrics,
        }
    }

    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown_rx))
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("Frame worker started");
        loop {
            let task = tokio::select! {
                task = self.receiver.dequeue() => task,
                _ = shutdown_rx.recv() => {
                    tracing::info!("Frame worker received shutdown signal");
                    break;
                }
            };

            let Some(task) = task else {
                tracing::info!("Frame queue closed");
                break;
            };

            self.metrics.set_queue_depth(self.receiver.len());
            self.process(task).await;
        }
        tracing::info!("Frame worker stopped");
    }

    #[instrument(skip(self, task), fields(session = %task.session_id, frame_id = %task.frame_id))]
    async fn process(&self, task: FrameTask) {
        if !self.registry.is_active(task.session_id) {
            tracing::debug!("Session no longer active, discarding frame");
            self.metrics
                .record_frame_dropped(telemetry::DROP_INACTIVE_DEQUEUE);
            return;
        }

        let FrameTask {
            session_id,
            payload,
            frame_id,
        } = task;

        match self.classify(payload).await {
            Ok(classification) => {
                let result = DetectionResult {
                    frame_id,
                    label: self.labels.label_for(classification.class_id),
                    confidence: classification.confidence,
                };
                tracing::debug!(
                    class_id = classification.class_id,
                    confidence = classification.confidence,
                    "Frame classified"
                );
                self.metrics.record_detection();
                self.sink.deliver(session_id, result);
            }
            Err(err) => {
                self.metrics.record_frame_failed(err.stage());
                match err {
                    FrameError::Worker(_) => tracing::error!("Frame processing failed: {}", err),
                    _ => tracing::warn!("Frame processing failed: {}", err),
                }
            }
        }
    }

    async fn classify(&self, payload: String) -> Result<Classification, FrameError> {
        let decoder = self.decoder.clone();
        let classifier = self.classifier.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let tensor = decoder.decode(&payload)?;
            Ok::<_, FrameError>(classifier.classify(&tensor)?)
        })
        .await
        .map_err(|e| FrameError::Worker(e.to_string()))?;

        self.metrics
            .record_inference_duration(started.elapsed().as_secs_f64() * 1000.0);

        result
    }
}
