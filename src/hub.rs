use crate::{
    protocol::{Action, ClientMessage, DetectionStatus, FramePayload, ServerEvent},
    queue::{FrameQueue, FrameTask},
    session::{SessionId, SessionRegistry},
    telemetry::{self, Metrics},
    worker::{DetectionResult, ResultSink},
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::instrument;

pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Maps connection lifecycle and inbound messages onto the session registry
/// and the frame queue, and routes worker results back to live connections.
///
/// Nothing here blocks: registry updates take a short lock and the queue and
/// outbound channels are unbounded.
pub struct ConnectionHub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<SessionId, mpsc::UnboundedSender<ServerEvent>>>,
    registry: Arc<SessionRegistry>,
    queue: FrameQueue,
    metrics: Arc<Metrics>,
}

impl ConnectionHub {
    pub fn new(registry: Arc<SessionRegistry>, queue: FrameQueue, metrics: Arc<Metrics>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            registry,
            queue,
            metrics,
        }
    }

    /// Registers a new connection and queues its acknowledgement. The
    /// session starts inactive.
    pub fn connect(&self) -> (SessionId, EventReceiver) {
        let session = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServerEvent::connected());
        self.connections.write().insert(session, tx);
        tracing::info!(%session, "Client connected");
        (session, rx)
    }

    pub fn disconnect(&self, session: SessionId) {
        self.registry.deactivate(session);
        self.connections.write().remove(&session);
        self.metrics
            .set_active_sessions(self.registry.active_count());
        tracing::info!(%session, "Client disconnected");
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.connections.read().contains_key(&session)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Parses and dispatches one text message. Malformed input is logged and
    /// dropped.
    pub fn handle_text(&self, session: SessionId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(session, message),
            Err(err) => tracing::warn!(%session, "Dropping client message: {}", err),
        }
    }

    pub fn handle_message(&self, session: SessionId, message: ClientMessage) {
        match message {
            ClientMessage::Command { action } => self.on_command(session, action),
            ClientMessage::Frame(payload) => self.on_frame(session, payload),
        }
    }

    fn on_command(&self, session: SessionId, action: Action) {
        let status = match action {
            Action::Start => {
                self.registry.activate(session);
                tracing::info!(%session, "Detection started");
                DetectionStatus::DetectionStarted
            }
            Action::Stop => {
                self.registry.deactivate(session);
                tracing::info!(%session, "Detection stopped");
                DetectionStatus::DetectionStopped
            }
            Action::Unknown => {
                tracing::debug!(%session, "Ignoring unknown command");
                return;
            }
        };
        self.metrics
            .set_active_sessions(self.registry.active_count());
        self.send(session, ServerEvent::Status { status });
    }

    #[instrument(skip(self, payload), fields(frame_id = %payload.frame_id))]
    fn on_frame(&self, session: SessionId, payload: FramePayload) {
        if !self.registry.is_active(session) {
            self.metrics
                .record_frame_dropped(telemetry::DROP_INACTIVE_INGEST);
            return;
        }

        let Some(image_data) = payload.image_data() else {
            tracing::debug!("Frame without image data");
            self.metrics.record_frame_dropped(telemetry::DROP_EMPTY_PAYLOAD);
            return;
        };

        let task = FrameTask::new(session, image_data, payload.frame_id.clone());
        self.queue.enqueue(task);
        self.metrics.record_frame_received();
        self.metrics.set_queue_depth(self.queue.len());
        tracing::debug!("Frame queued");
    }

    /// Best-effort push. A vanished connection is not an error.
    fn send(&self, session: SessionId, event: ServerEvent) -> bool {
        match self.connections.read().get(&session) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl ResultSink for ConnectionHub {
    fn deliver(&self, session: SessionId, result: DetectionResult) {
        if !self.registry.is_active(session) {
            tracing::debug!(%session, "Session inactive, skipping detection");
            return;
        }
        let text = result.text();
        let delivered = self.send(
            session,
            ServerEvent::Detection {
                frame_id: result.frame_id,
                text,
            },
        );
        if !delivered {
            tracing::debug!(%session, "Connection gone, skipping detection");
        }
    }
}
