use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageBuffer, Rgb};
use serde_json::{json, Value};
use sign_detection::{
    decoder::{ImageDecoder, PixelTensor},
    hub::{ConnectionHub, EventReceiver},
    labels::LabelSet,
    model::{Classification, Classifier, InferenceError},
    protocol::{DetectionStatus, ServerEvent},
    queue::frame_queue,
    session::{SessionId, SessionRegistry},
    telemetry::{self, Metrics},
    worker::FrameWorker,
};
use std::{io::Cursor, sync::Arc, time::Duration};
use tokio::sync::broadcast;

/// Red-dominant frames are "Hello", everything else "Thanks".
struct RednessClassifier;

impl Classifier for RednessClassifier {
    fn classify(&self, input: &PixelTensor) -> Result<Classification, InferenceError> {
        let red = input[[0, 0, 0, 0]];
        let blue = input[[0, 0, 0, 2]];
        if red == blue {
            return Err(InferenceError::Runtime("ambiguous frame".to_string()));
        }
        Ok(Classification {
            class_id: if red > blue { 0 } else { 1 },
            confidence: 0.876,
        })
    }
}

fn data_uri(color: [u8; 3]) -> String {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(64, 64, Rgb(color));
    let mut image_data: Vec<u8> = Vec::new();
    img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(image_data))
}

fn frame(color: [u8; 3], frame_id: Value) -> String {
    json!({"type": "frame", "data": data_uri(color), "frameId": frame_id}).to_string()
}

const RED: [u8; 3] = [255, 0, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const GREY: [u8; 3] = [128, 128, 128];

struct Pipeline {
    hub: Arc<ConnectionHub>,
    metrics: Arc<Metrics>,
    _shutdown_tx: broadcast::Sender<()>,
}

impl Pipeline {
    fn start() -> Self {
        let (queue, receiver) = frame_queue();
        let registry = Arc::new(SessionRegistry::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let hub = Arc::new(ConnectionHub::new(
            registry.clone(),
            queue,
            metrics.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        FrameWorker::new(
            receiver,
            registry,
            Arc::new(ImageDecoder::default()),
            Arc::new(RednessClassifier),
            Arc::new(LabelSet::new(vec!["Hello".into(), "Thanks".into()])),
            hub.clone(),
            metrics.clone(),
        )
        .spawn(shutdown_tx.subscribe());

        Self {
            hub,
            metrics,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn connect(&self) -> (SessionId, EventReceiver) {
        let (session, mut events) = self.hub.connect();
        assert_eq!(events.try_recv().unwrap(), ServerEvent::connected());
        (session, events)
    }

    fn start_detection(&self, session: SessionId, events: &mut EventReceiver) {
        self.hub
            .handle_text(session, r#"{"type":"command","action":"start"}"#);
        assert_eq!(
            events.try_recv().unwrap(),
            ServerEvent::Status {
                status: DetectionStatus::DetectionStarted
            }
        );
    }
}

async fn next_event(events: &mut EventReceiver) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("connection closed")
}

fn detection(frame_id: Value, text: &str) -> ServerEvent {
    ServerEvent::Detection {
        frame_id,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_start_detect_stop_flow() {
    let pipeline = Pipeline::start();
    let (session, mut events) = pipeline.connect();
    pipeline.start_detection(session, &mut events);

    pipeline.hub.handle_text(session, &frame(RED, json!("f1")));
    assert_eq!(
        next_event(&mut events).await,
        detection(json!("f1"), "Hello (confidence: 0.88)")
    );

    pipeline
        .hub
        .handle_text(session, r#"{"type":"command","action":"stop"}"#);
    assert_eq!(
        next_event(&mut events).await,
        ServerEvent::Status {
            status: DetectionStatus::DetectionStopped
        }
    );

    pipeline.hub.handle_text(session, &frame(RED, json!("f2")));
    assert_eq!(
        pipeline
            .metrics
            .frames_dropped(telemetry::DROP_INACTIVE_INGEST),
        1
    );

    // A second session's frame flushes the worker past anything in flight.
    let (other, mut other_events) = pipeline.connect();
    pipeline.start_detection(other, &mut other_events);
    pipeline.hub.handle_text(other, &frame(BLUE, json!("sentinel")));
    assert_eq!(
        next_event(&mut other_events).await,
        detection(json!("sentinel"), "Thanks (confidence: 0.88)")
    );

    assert!(events.try_recv().is_err());
    assert_eq!(pipeline.metrics.frames_received(), 2);
}

#[tokio::test]
async fn test_interleaved_sessions_receive_only_their_results() {
    let pipeline = Pipeline::start();
    let (a, mut a_events) = pipeline.connect();
    let (b, mut b_events) = pipeline.connect();
    pipeline.start_detection(a, &mut a_events);
    pipeline.start_detection(b, &mut b_events);

    pipeline.hub.handle_text(a, &frame(RED, json!("A1")));
    pipeline.hub.handle_text(b, &frame(BLUE, json!("B1")));
    pipeline.hub.handle_text(a, &frame(BLUE, json!("A2")));

    assert_eq!(
        next_event(&mut a_events).await,
        detection(json!("A1"), "Hello (confidence: 0.88)")
    );
    assert_eq!(
        next_event(&mut a_events).await,
        detection(json!("A2"), "Thanks (confidence: 0.88)")
    );
    assert_eq!(
        next_event(&mut b_events).await,
        detection(json!("B1"), "Thanks (confidence: 0.88)")
    );
    assert!(a_events.try_recv().is_err());
    assert!(b_events.try_recv().is_err());
}

#[tokio::test]
async fn test_bad_frames_do_not_block_later_frames() {
    let pipeline = Pipeline::start();
    let (session, mut events) = pipeline.connect();
    pipeline.start_detection(session, &mut events);

    pipeline.hub.handle_text(
        session,
        r#"{"type":"frame","data":"data:image/png;base64,@@@@","frameId":1}"#,
    );
    pipeline.hub.handle_text(
        session,
        &json!({"type": "frame", "data": STANDARD.encode(b"plain text"), "frameId": 2}).to_string(),
    );
    pipeline.hub.handle_text(session, &frame(GREY, json!(3)));
    pipeline.hub.handle_text(session, &frame(RED, json!(4)));

    assert_eq!(
        next_event(&mut events).await,
        detection(json!(4), "Hello (confidence: 0.88)")
    );
    assert_eq!(pipeline.metrics.frames_failed(telemetry::STAGE_DECODE), 2);
    assert_eq!(pipeline.metrics.frames_failed(telemetry::STAGE_INFERENCE), 1);
}

#[tokio::test]
async fn test_disconnect_with_frames_still_queued() {
    let pipeline = Pipeline::start();
    let (gone, mut gone_events) = pipeline.connect();
    pipeline.start_detection(gone, &mut gone_events);

    for i in 0..20 {
        pipeline.hub.handle_text(gone, &frame(RED, json!(i)));
    }
    pipeline.hub.disconnect(gone);
    drop(gone_events);

    let (session, mut events) = pipeline.connect();
    assert_ne!(session, gone);
    pipeline.start_detection(session, &mut events);
    pipeline.hub.handle_text(session, &frame(BLUE, json!("after")));

    assert_eq!(
        next_event(&mut events).await,
        detection(json!("after"), "Thanks (confidence: 0.88)")
    );
    assert!(!pipeline.hub.is_connected(gone));
    assert_eq!(pipeline.metrics.frames_received(), 21);
    // Every frame of the vanished session was either processed before the
    // disconnect or discarded by the worker afterwards.
    assert_eq!(
        pipeline
            .metrics
            .frames_dropped(telemetry::DROP_INACTIVE_DEQUEUE)
            + pipeline.metrics.detections_emitted(),
        21
    );
}
