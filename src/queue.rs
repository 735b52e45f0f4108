use crate::session::SessionId;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// One submitted frame awaiting inference.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTask {
    pub session_id: SessionId,
    /// Base64 image data with any data-URI prefix already removed.
    pub payload: String,
    /// Client correlation token, echoed back untouched.
    pub frame_id: Value,
}

impl FrameTask {
    pub fn new(session_id: SessionId, payload: impl Into<String>, frame_id: Value) -> Self {
        Self {
            session_id,
            payload: payload.into(),
            frame_id,
        }
    }
}

/// Creates the unbounded frame queue. The producer half may be cloned
/// freely; the receiver is the single consumer.
pub fn frame_queue() -> (FrameQueue, FrameReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        FrameQueue {
            tx,
            depth: depth.clone(),
        },
        FrameReceiver { rx, depth },
    )
}

#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: mpsc::UnboundedSender<FrameTask>,
    depth: Arc<AtomicUsize>,
}

impl FrameQueue {
    /// Appends to the tail. Never blocks.
    pub fn enqueue(&self, task: FrameTask) {
        // Count before sending so the receiver never decrements below zero.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.tx.send(task) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(
                session = %err.0.session_id,
                frame_id = %err.0.frame_id,
                "Frame worker is gone, dropping frame"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<FrameTask>,
    depth: Arc<AtomicUsize>,
}

impl FrameReceiver {
    /// Pops the head if one is ready.
    pub fn try_dequeue(&mut self) -> Option<FrameTask> {
        let task = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    /// Waits for the next task. `None` once every producer has been dropped
    /// and the queue is drained.
    pub async fn dequeue(&mut self) -> Option<FrameTask> {
        let task = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(session: u64, frame: &str) -> FrameTask {
        FrameTask::new(SessionId::new(session), "payload", json!(frame))
    }

    #[test]
    fn test_try_dequeue_on_empty_queue() {
        let (_queue, mut receiver) = frame_queue();
        assert!(receiver.try_dequeue().is_none());
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let (queue, mut receiver) = frame_queue();
        queue.enqueue(task(1, "a"));
        queue.enqueue(task(2, "b"));
        queue.enqueue(task(1, "c"));
        assert_eq!(queue.len(), 3);

        let frames: Vec<_> = std::iter::from_fn(|| receiver.try_dequeue())
            .map(|t| t.frame_id)
            .collect();

        assert_eq!(frames, vec![json!("a"), json!("b"), json!("c")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_after_receiver_dropped_does_not_panic() {
        let (queue, receiver) = frame_queue();
        drop(receiver);
        queue.enqueue(task(1, "lost"));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_producer() {
        let (queue, mut receiver) = frame_queue();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            queue.enqueue(task(9, "late"));
        });

        let received = receiver.dequeue().await.expect("task");
        assert_eq!(received.frame_id, json!("late"));
        producer.await.unwrap();

        // All producers are gone now.
        assert!(receiver.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_many_producers_preserve_per_producer_order() {
        let (queue, mut receiver) = frame_queue();

        let producers: Vec<_> = (0..4u64)
            .map(|session| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        queue.enqueue(FrameTask::new(SessionId::new(session), "p", json!(i)));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        drop(queue);

        let mut last_seen = [-1i64; 4];
        let mut total = 0;
        while let Some(task) = receiver.dequeue().await {
            let session = task.session_id.as_u64() as usize;
            let index = task.frame_id.as_i64().unwrap();
            assert!(index > last_seen[session]);
            last_seen[session] = index;
            total += 1;
        }

        assert_eq!(total, 200);
        assert_eq!(last_seen, [49; 4]);
    }
}
