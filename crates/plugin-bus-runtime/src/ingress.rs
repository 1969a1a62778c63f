//! The event ingress surface: a bounded FIFO of inbound events that the
//! host's (out-of-scope) HTTP front door admits into and drains from.
//!
//! Models the queue semantics of the original `asyncio.Queue`-backed
//! ingress in `original_source/main_helper/user_plugin_server.py`: a
//! drop-oldest-then-retry-once admission policy, and a non-destructive
//! inspection method that drains and requeues so repeated inspection
//! never loses an event.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The three event kinds the ingress surface admits. See `spec.md` §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressKind {
    Messages,
    ToolCall,
    PluginInvoked,
}

/// One admitted event: its kind, raw JSON payload, arrival time, and an
/// optional client identifier (the HTTP front door's caller, when known).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressEnvelope {
    pub kind: IngressKind,
    pub payload: Value,
    pub received_at: f64,
    pub client: Option<String>,
}

impl IngressEnvelope {
    pub fn new(kind: IngressKind, payload: Value, client: Option<String>) -> Self {
        Self {
            kind,
            payload,
            received_at: now_ts(),
            client,
        }
    }
}

/// A bounded FIFO of [`IngressEnvelope`]s. Default capacity 1000, matching
/// `EVENT_QUEUE_MAX` in the original HTTP front door.
pub struct IngressQueue {
    capacity: usize,
    items: Mutex<VecDeque<IngressEnvelope>>,
}

impl IngressQueue {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admits `envelope`. If the queue is full, drops the oldest item and
    /// retries once; if it is still full after that (e.g. another admitter
    /// raced in), logs and drops the new item instead.
    pub fn admit(&self, envelope: IngressEnvelope) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            warn!(capacity = self.capacity, "event ingress queue full, dropping oldest");
            items.pop_front();
        }
        if items.len() >= self.capacity {
            error!("event ingress queue still full after dropping oldest, dropping new item");
            return;
        }
        items.push_back(envelope);
    }

    /// Non-destructive inspection: returns a FIFO-order snapshot of up to
    /// `min(limit, capacity)` items without removing them from the queue
    /// (equivalent to the original's drain-then-requeue, without the
    /// window where the queue would otherwise sit briefly empty).
    pub fn inspect(&self, limit: usize) -> Vec<IngressEnvelope> {
        let bound = limit.min(self.capacity);
        let items = self.items.lock();
        items.iter().take(bound).cloned().collect()
    }

    /// Drains every item and returns it, leaving the queue empty. Mirrors
    /// the original front door's `/admin/clear` endpoint.
    pub fn drain_all(&self) -> Vec<IngressEnvelope> {
        self.items.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(n: i64) -> IngressEnvelope {
        IngressEnvelope::new(IngressKind::Messages, serde_json::json!({ "n": n }), None)
    }

    #[test]
    fn admits_up_to_capacity() {
        let queue = IngressQueue::new(3);
        for n in 0..3 {
            queue.admit(envelope(n));
        }
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn drop_oldest_when_full() {
        let queue = IngressQueue::new(3);
        for n in 0..4 {
            queue.admit(envelope(n));
        }
        assert_eq!(queue.len(), 3);
        let remaining: Vec<i64> = queue
            .inspect(10)
            .iter()
            .map(|e| e.payload.get("n").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(remaining, vec![1, 2, 3]);
    }

    #[test]
    fn inspect_is_non_destructive() {
        let queue = IngressQueue::new(5);
        for n in 0..3 {
            queue.admit(envelope(n));
        }
        let first = queue.inspect(10);
        let second = queue.inspect(10);
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn inspect_is_bounded_by_min_of_limit_and_capacity() {
        let queue = IngressQueue::new(3);
        for n in 0..3 {
            queue.admit(envelope(n));
        }
        assert_eq!(queue.inspect(100).len(), 3);
        assert_eq!(queue.inspect(1).len(), 1);
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let queue = IngressQueue::new(3);
        for n in 0..3 {
            queue.admit(envelope(n));
        }
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn default_capacity_matches_original_front_door() {
        assert_eq!(IngressQueue::DEFAULT_CAPACITY, 1000);
    }
}
