use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::collections::HashSet;

pub const DROP_INACTIVE_INGEST: &str = "inactive_ingest";
pub const DROP_INACTIVE_DEQUEUE: &str = "inactive_dequeue";
pub const DROP_EMPTY_PAYLOAD: &str = "empty_payload";

pub const STAGE_DECODE: &str = "decode";
pub const STAGE_INFERENCE: &str = "inference";
pub const STAGE_WORKER: &str = "worker";

pub struct Metrics {
    frames_received: IntCounter,
    frames_dropped: IntCounterVec,
    frames_failed: IntCounterVec,
    detections_emitted: IntCounter,
    inference_duration: Histogram,
    queue_depth: IntGauge,
    active_sessions: IntGauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let frames_received = IntCounter::new(
            "frames_received_total",
            "Total number of frames accepted into the queue",
        )?;
        let frames_dropped = IntCounterVec::new(
            Opts::new("frames_dropped_total", "Frames discarded without inference"),
            &["reason"],
        )?;
        let frames_failed = IntCounterVec::new(
            Opts::new("frames_failed_total", "Frames that failed during processing"),
            &["stage"],
        )?;
        let detections_emitted = IntCounter::new(
            "detections_emitted_total",
            "Detection results handed to the transport",
        )?;

        let boundaries = generate_boundaries((5, 25, 50, 250, 1000));
        let inference_duration = Histogram::with_opts(
            HistogramOpts::new(
                "inference_duration_ms",
                "Duration of decode and inference per frame in milliseconds",
            )
            .buckets(boundaries),
        )?;

        let queue_depth = IntGauge::new("queue_depth", "Frames waiting for the worker")?;
        let active_sessions =
            IntGauge::new("active_sessions", "Sessions with detection enabled")?;

        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(frames_failed.clone()))?;
        registry.register(Box::new(detections_emitted.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Metrics {
            frames_received,
            frames_dropped,
            frames_failed,
            detections_emitted,
            inference_duration,
            queue_depth,
            active_sessions,
            registry,
        })
    }

    pub fn record_frame_received(&self) {
        self.frames_received.inc();
    }

    pub fn record_frame_dropped(&self, reason: &str) {
        self.frames_dropped.with_label_values(&[reason]).inc();
    }

    pub fn record_frame_failed(&self, stage: &str) {
        self.frames_failed.with_label_values(&[stage]).inc();
    }

    pub fn record_detection(&self) {
        self.detections_emitted.inc();
    }

    pub fn record_inference_duration(&self, duration_ms: f64) {
        self.inference_duration.observe(duration_ms);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.get()
    }

    pub fn frames_dropped(&self, reason: &str) -> u64 {
        self.frames_dropped.with_label_values(&[reason]).get()
    }

    pub fn frames_failed(&self, stage: &str) -> u64 {
        self.frames_failed.with_label_values(&[stage]).get()
    }

    pub fn detections_emitted(&self) -> u64 {
        self.detections_emitted.get()
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 5;
    let end_step: usize = 50;
    let tail_step: usize = 250;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
