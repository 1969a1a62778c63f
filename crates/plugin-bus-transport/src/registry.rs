//! The host-side state registry: the shared rendezvous consulted when a
//! context has no direct response queue, and always consulted once more at
//! deadline expiry for orphan cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plugin_bus_core::ResponseEnvelope;

/// Peek/consume access to responses the host has collected, keyed by
/// `request_id`. Implementations must be safe for concurrent peek/consume;
/// exactly one consumer should ever succeed in taking a given response.
#[async_trait]
pub trait StateRegistry: Send + Sync {
    /// Looks at a response without consuming it.
    fn peek_plugin_response(&self, request_id: &str) -> Option<ResponseEnvelope>;

    /// Consumes and returns a response, if one has arrived.
    fn get_plugin_response(&self, request_id: &str) -> Option<ResponseEnvelope>;

    /// Records a response the router has produced for later pickup.
    fn put_plugin_response(&self, response: ResponseEnvelope);

    /// Polls for a response at short intervals until `timeout` elapses.
    /// Offered as a convenience for blocking lifecycle waits; the round-trip
    /// algorithm itself polls directly via `get_plugin_response`.
    async fn wait_for_plugin_response(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Option<ResponseEnvelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(response) = self.get_plugin_response(request_id) {
                return Some(response);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A simple in-process [`StateRegistry`] backed by a locked map. Adequate
/// for a single-host-process deployment and for tests; a distributed host
/// would swap this for a shared store.
#[derive(Default, Clone)]
pub struct InMemoryStateRegistry {
    responses: Arc<Mutex<HashMap<String, ResponseEnvelope>>>,
}

impl InMemoryStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRegistry for InMemoryStateRegistry {
    fn peek_plugin_response(&self, request_id: &str) -> Option<ResponseEnvelope> {
        self.responses.lock().get(request_id).cloned()
    }

    fn get_plugin_response(&self, request_id: &str) -> Option<ResponseEnvelope> {
        self.responses.lock().remove(request_id)
    }

    fn put_plugin_response(&self, response: ResponseEnvelope) {
        self.responses.lock().insert(response.request_id.clone(), response);
    }
}
