//! The reliable queue path: the host-drained inbound request queue, the
//! per-context response queue, and the plain push fallback queue.

use std::time::Duration;

use plugin_bus_core::{RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// The producer half of the host's inbound request queue. Cloned into every
/// plugin context; the host owns the single [`PluginCommQueueReceiver`].
#[derive(Clone)]
pub struct PluginCommQueue {
    tx: mpsc::Sender<RequestEnvelope>,
}

impl PluginCommQueue {
    pub fn channel(capacity: usize) -> (Self, PluginCommQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, PluginCommQueueReceiver { rx })
    }

    /// Enqueues `envelope`, using the caller's overall deadline as the
    /// queue-put timeout too.
    pub async fn put(&self, envelope: RequestEnvelope, deadline: Duration) -> TransportResult<()> {
        match tokio::time::timeout(deadline, self.tx.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::QueueClosed),
            Err(_) => Err(TransportError::Timeout(deadline.as_secs_f64())),
        }
    }
}

/// Host-side consumer of [`PluginCommQueue`].
pub struct PluginCommQueueReceiver {
    rx: mpsc::Receiver<RequestEnvelope>,
}

impl PluginCommQueueReceiver {
    pub async fn recv(&mut self) -> Option<RequestEnvelope> {
        self.rx.recv().await
    }
}

/// Per-context response delivery. Unbounded: the host must never drop a
/// response it is actively delivering, and the channel is drained
/// continuously by the owning plugin's wait loop.
pub struct ResponseQueue {
    rx: mpsc::UnboundedReceiver<ResponseEnvelope>,
}

/// The host-held half used to deliver responses into a plugin's
/// [`ResponseQueue`]. Responses may be sent in any order relative to the
/// requests that produced them.
#[derive(Clone)]
pub struct ResponseQueueSender {
    tx: mpsc::UnboundedSender<ResponseEnvelope>,
}

impl ResponseQueueSender {
    pub fn deliver(&self, response: ResponseEnvelope) -> TransportResult<()> {
        self.tx
            .send(response)
            .map_err(|_| TransportError::QueueClosed)
    }
}

impl ResponseQueue {
    pub fn channel() -> (ResponseQueueSender, ResponseQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ResponseQueueSender { tx }, ResponseQueue { rx })
    }

    /// Attempts one read, bounded by `per_read_timeout` (the round-trip
    /// algorithm uses short reads of at most 50ms while draining this queue
    /// looking for a specific `request_id`).
    pub async fn try_recv_within(&mut self, per_read_timeout: Duration) -> Option<ResponseEnvelope> {
        tokio::time::timeout(per_read_timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// The plain reliable fallback sink for pushes, used when no low-latency
/// client is configured. Enqueueing is always non-blocking; a full queue
/// means the push is dropped (and logged by the caller).
#[derive(Clone)]
pub struct MessageQueue {
    tx: mpsc::Sender<Value>,
}

impl MessageQueue {
    pub fn channel(capacity: usize) -> (Self, MessageQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, MessageQueueReceiver { rx })
    }

    /// Returns `true` if the envelope was enqueued, `false` if the queue
    /// was full or closed and the push was dropped.
    pub fn try_push(&self, envelope: Value) -> bool {
        self.tx.try_send(envelope).is_ok()
    }
}

pub struct MessageQueueReceiver {
    rx: mpsc::Receiver<Value>,
}

impl MessageQueueReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn comm_queue_put_and_recv() {
        let (queue, mut rx) = PluginCommQueue::channel(4);
        let envelope = RequestEnvelope::new(
            plugin_bus_core::RequestKind::MessageGet,
            "p1",
            5.0,
            Value::Null,
        );
        queue.put(envelope.clone(), Duration::from_millis(50)).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.request_id, envelope.request_id);
    }

    #[tokio::test]
    async fn comm_queue_put_times_out_when_full_and_unconsumed() {
        let (queue, _rx) = PluginCommQueue::channel(1);
        let envelope = |kind| RequestEnvelope::new(kind, "p1", 5.0, Value::Null);
        queue
            .put(envelope(plugin_bus_core::RequestKind::MessageGet), Duration::from_millis(50))
            .await
            .unwrap();
        let result = queue
            .put(envelope(plugin_bus_core::RequestKind::MessageGet), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn response_queue_delivers_out_of_order() {
        let (sender, mut queue) = ResponseQueue::channel();
        sender.deliver(ResponseEnvelope::success("b", Value::Null)).unwrap();
        sender.deliver(ResponseEnvelope::success("a", Value::Null)).unwrap();
        let first = queue.try_recv_within(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.request_id, "b");
    }

    #[test]
    fn message_queue_drops_when_full() {
        let (queue, _rx) = MessageQueue::channel(1);
        assert!(queue.try_push(Value::Null));
        assert!(!queue.try_push(Value::Null));
    }
}
