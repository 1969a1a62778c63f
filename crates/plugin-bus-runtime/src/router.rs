//! Host-side router: drains the inbound request queue, resolves
//! `plugin_id` routing rules, serializes inter-plugin handler execution,
//! and delivers responses back to the originating plugin.
//!
//! This module implements the *contract* `plugin-bus-framework::context`
//! consumes — not any particular plugin's business logic, which a host
//! supplies through [`RequestHandler`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use plugin_bus_core::{RequestEnvelope, RequestKind, ResponseEnvelope};
use plugin_bus_transport::{
    MessageQueueReceiver, PluginCommQueueReceiver, ResponseQueueSender, StateRegistry,
};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

/// Request kinds whose `plugin_id` field follows the `MESSAGE_GET`-style
/// resolution rule: absent/null/empty resolves to the caller's own id;
/// `"*"` is preserved verbatim.
fn resolves_plugin_id(kind: RequestKind) -> bool {
    matches!(
        kind,
        RequestKind::MessageGet | RequestKind::EventGet | RequestKind::LifecycleGet
    )
}

/// Replaces an absent/null/empty `plugin_id` field in `data` with
/// `from_plugin`. A `"*"` wildcard, or any other non-empty value, is left
/// untouched.
fn resolve_query_plugin_id(data: &mut Value, from_plugin: &str) {
    let Some(obj) = data.as_object_mut() else {
        return;
    };
    let needs_resolution = match obj.get("plugin_id") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    };
    if needs_resolution {
        obj.insert("plugin_id".to_string(), Value::String(from_plugin.to_string()));
    }
}

/// The target plugin of a `PLUGIN_TO_PLUGIN` call, read from the `to_plugin`
/// field. Falls back to the caller's own id (a degenerate self-call) when
/// the field is absent, rather than panicking on a malformed request.
fn plugin_to_plugin_target(envelope: &RequestEnvelope) -> String {
    envelope
        .data
        .get("to_plugin")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| envelope.from_plugin.clone())
}

/// Implemented by the host to execute the business logic behind each
/// [`RequestKind`]. The router handles routing concerns (id resolution,
/// per-plugin serialization, response delivery); this trait is where a
/// host plugs in message storage, the memory store, plugin registries,
/// and so on.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, envelope: &RequestEnvelope) -> ResponseEnvelope;
}

struct PluginRegistration {
    response_sender: Option<ResponseQueueSender>,
    command_lock: Arc<AsyncMutex<()>>,
}

/// Tracks, per plugin, the response channel to deliver to and the lock
/// that serializes `PLUGIN_TO_PLUGIN` dispatch onto that plugin's command
/// loop.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, PluginRegistration>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a plugin's direct response channel. A
    /// plugin with no direct channel falls back to the state registry for
    /// response delivery.
    pub fn register(&self, plugin_id: impl Into<String>, response_sender: Option<ResponseQueueSender>) {
        let plugin_id = plugin_id.into();
        let mut plugins = self.plugins.write();
        match plugins.get_mut(&plugin_id) {
            Some(existing) => existing.response_sender = response_sender,
            None => {
                plugins.insert(
                    plugin_id,
                    PluginRegistration {
                        response_sender,
                        command_lock: Arc::new(AsyncMutex::new(())),
                    },
                );
            }
        }
    }

    pub fn unregister(&self, plugin_id: &str) {
        self.plugins.write().remove(plugin_id);
    }

    fn response_sender(&self, plugin_id: &str) -> Option<ResponseQueueSender> {
        self.plugins.read().get(plugin_id).and_then(|p| p.response_sender.clone())
    }

    /// Returns the per-plugin command lock, creating an unregistered entry
    /// on demand (a plugin with no direct response channel can still be the
    /// target of a `PLUGIN_TO_PLUGIN` call, e.g. one reached only through
    /// the state registry).
    fn command_lock_for(&self, plugin_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(reg) = self.plugins.read().get(plugin_id) {
            return reg.command_lock.clone();
        }
        let mut plugins = self.plugins.write();
        plugins
            .entry(plugin_id.to_string())
            .or_insert_with(|| PluginRegistration {
                response_sender: None,
                command_lock: Arc::new(AsyncMutex::new(())),
            })
            .command_lock
            .clone()
    }
}

/// Drains `plugin_comm_queue`, dispatches each request to the supplied
/// [`RequestHandler`], and delivers the response to the originating
/// plugin, either via its registered response queue or via the shared
/// state registry.
pub struct Router<H: RequestHandler> {
    handler: Arc<H>,
    state_registry: Arc<dyn StateRegistry>,
    registry: Arc<PluginRegistry>,
}

impl<H: RequestHandler + 'static> Router<H> {
    pub fn new(handler: Arc<H>, state_registry: Arc<dyn StateRegistry>) -> Self {
        Self {
            handler,
            state_registry,
            registry: Arc::new(PluginRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    /// Registers a plugin's direct response channel.
    pub fn register_plugin(&self, plugin_id: impl Into<String>, response_sender: Option<ResponseQueueSender>) {
        self.registry.register(plugin_id, response_sender);
    }

    pub fn unregister_plugin(&self, plugin_id: &str) {
        self.registry.unregister(plugin_id);
    }

    /// Runs the consumer loop until `comm_rx` closes. Each request is
    /// dispatched on its own task so a slow `PLUGIN_TO_PLUGIN` handler
    /// invocation never blocks unrelated requests; serialization onto a
    /// single plugin's command loop is enforced by `command_lock_for`.
    pub async fn run(self: Arc<Self>, mut comm_rx: PluginCommQueueReceiver) {
        while let Some(envelope) = comm_rx.recv().await {
            let router = self.clone();
            tokio::spawn(async move {
                router.dispatch(envelope).await;
            });
        }
    }

    async fn dispatch(&self, mut envelope: RequestEnvelope) {
        let from_plugin = envelope.from_plugin.clone();
        let request_id = envelope.request_id.clone();
        let expects_response = envelope.kind.expects_response();

        if resolves_plugin_id(envelope.kind) {
            resolve_query_plugin_id(&mut envelope.data, &from_plugin);
        }

        let response = if envelope.kind == RequestKind::PluginToPlugin {
            let target = plugin_to_plugin_target(&envelope);
            let lock = self.registry.command_lock_for(&target);
            let _guard = lock.lock().await;
            self.handler.handle(&envelope).await
        } else {
            self.handler.handle(&envelope).await
        };

        if !expects_response {
            return;
        }
        debug_assert_eq!(response.request_id, request_id);
        self.deliver(&from_plugin, response);
    }

    fn deliver(&self, plugin_id: &str, response: ResponseEnvelope) {
        if let Some(sender) = self.registry.response_sender(plugin_id) {
            if sender.deliver(response.clone()).is_ok() {
                return;
            }
            warn!(plugin_id, "response channel closed, falling back to state registry");
        }
        self.state_registry.put_plugin_response(response);
    }
}

/// Accepts in-order push items as a per-plugin [`SeqReorderBuffer`]
/// releases them. Implemented by the host's durable-push consumer.
pub trait PushSink: Send + Sync {
    fn accept(&self, plugin_id: &str, item: Value);
}

/// Buffers out-of-order pushes for one plugin and releases the longest
/// contiguous run starting at the next expected `seq`. A push below the
/// next expected `seq` (a duplicate or stale retransmit) is dropped.
struct SeqReorderBuffer {
    next_seq: u64,
    pending: BTreeMap<u64, Value>,
}

impl SeqReorderBuffer {
    fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BTreeMap::new(),
        }
    }

    fn ingest(&mut self, seq: u64, item: Value) -> Vec<Value> {
        if seq < self.next_seq {
            return Vec::new();
        }
        self.pending.insert(seq, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_seq) {
            ready.push(item);
            self.next_seq += 1;
        }
        ready
    }
}

/// The low-latency socket endpoint's batch sink: reorders pushes by `seq`
/// per plugin before handing them, in order, to a durable [`PushSink`].
pub struct BatchReorderSink<S: PushSink> {
    sink: S,
    buffers: parking_lot::Mutex<HashMap<String, SeqReorderBuffer>>,
}

impl<S: PushSink> BatchReorderSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            buffers: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Accepts a batch of `(seq, item)` pairs for `plugin_id`, releasing
    /// every contiguous run to the underlying sink in `seq` order.
    pub fn accept_batch(&self, plugin_id: &str, items: Vec<(u64, Value)>) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .entry(plugin_id.to_string())
            .or_insert_with(SeqReorderBuffer::new);
        let mut ready = Vec::new();
        for (seq, item) in items {
            ready.extend(buffer.ingest(seq, item));
        }
        drop(buffers);
        for item in ready {
            self.sink.accept(plugin_id, item);
        }
    }
}

/// Drains the reliable fallback [`plugin_bus_transport::MessageQueue`] used
/// when no low-latency client is configured, forwarding each item directly
/// to `sink` (no reordering needed: a single producer per plugin already
/// serializes these through `push_lock`).
pub async fn run_message_queue_sink<S: PushSink>(mut rx: MessageQueueReceiver, sink: Arc<S>) {
    while let Some(item) = rx.recv().await {
        let plugin_id = item
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        sink.accept(&plugin_id, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_bus_transport::{InMemoryStateRegistry, PluginCommQueue, ResponseQueue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingHandler {
        calls: TokioMutex<Vec<(String, Value)>>,
        busy: AtomicUsize,
        max_concurrent_per_target: AtomicUsize,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                calls: TokioMutex::new(Vec::new()),
                busy: AtomicUsize::new(0),
                max_concurrent_per_target: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RequestHandler for RecordingHandler {
        async fn handle(&self, envelope: &RequestEnvelope) -> ResponseEnvelope {
            if envelope.kind == RequestKind::PluginToPlugin {
                let now_busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent_per_target.fetch_max(now_busy, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.busy.fetch_sub(1, Ordering::SeqCst);
            }
            self.calls.lock().await.push((envelope.from_plugin.clone(), envelope.data.clone()));
            ResponseEnvelope::success(envelope.request_id.clone(), Value::Null)
        }
    }

    fn build_router() -> (Arc<Router<RecordingHandler>>, Arc<RecordingHandler>, Arc<InMemoryStateRegistry>) {
        let handler = Arc::new(RecordingHandler::new());
        let state_registry = Arc::new(InMemoryStateRegistry::new());
        let router = Arc::new(Router::new(handler.clone(), state_registry.clone() as Arc<dyn StateRegistry>));
        (router, handler, state_registry)
    }

    #[tokio::test]
    async fn resolves_none_plugin_id_to_caller_for_message_get() {
        let (router, _handler, state_registry) = build_router();
        let (queue, comm_rx) = PluginCommQueue::channel(8);
        let run_handle = tokio::spawn(router.clone().run(comm_rx));

        let envelope = RequestEnvelope::new(
            RequestKind::MessageGet,
            "p1",
            5.0,
            serde_json::json!({ "plugin_id": null, "max_count": 10 }),
        );
        let request_id = envelope.request_id.clone();
        queue.put(envelope, Duration::from_millis(50)).await.unwrap();

        let response = state_registry
            .wait_for_plugin_response(&request_id, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(!response.is_error());
        run_handle.abort();
    }

    #[tokio::test]
    async fn preserves_wildcard_plugin_id() {
        let (router, handler, state_registry) = build_router();
        let (queue, comm_rx) = PluginCommQueue::channel(8);
        let run_handle = tokio::spawn(router.clone().run(comm_rx));

        let envelope = RequestEnvelope::new(
            RequestKind::EventGet,
            "p1",
            5.0,
            serde_json::json!({ "plugin_id": "*", "max_count": 10 }),
        );
        let request_id = envelope.request_id.clone();
        queue.put(envelope, Duration::from_millis(50)).await.unwrap();
        state_registry
            .wait_for_plugin_response(&request_id, Duration::from_millis(500))
            .await
            .unwrap();

        let calls = handler.calls.lock().await;
        assert_eq!(calls[0].1.get("plugin_id").and_then(Value::as_str), Some("*"));
        run_handle.abort();
    }

    #[tokio::test]
    async fn plugin_to_plugin_calls_serialize_on_the_target() {
        let (router, handler, state_registry) = build_router();
        let (queue, comm_rx) = PluginCommQueue::channel(8);
        let run_handle = tokio::spawn(router.clone().run(comm_rx));

        for _ in 0..5 {
            let envelope = RequestEnvelope::new(
                RequestKind::PluginToPlugin,
                "caller",
                5.0,
                serde_json::json!({ "to_plugin": "target", "event": "ping" }),
            );
            let request_id = envelope.request_id.clone();
            queue.put(envelope, Duration::from_millis(50)).await.unwrap();
            state_registry
                .wait_for_plugin_response(&request_id, Duration::from_millis(500))
                .await
                .unwrap();
        }

        assert_eq!(handler.max_concurrent_per_target.load(Ordering::SeqCst), 1);
        run_handle.abort();
    }

    #[tokio::test]
    async fn delivers_to_registered_response_queue_when_present() {
        let (router, _handler, _state_registry) = build_router();
        let (sender, mut response_queue) = ResponseQueue::channel();
        router.register_plugin("p1", Some(sender));

        let (queue, comm_rx) = PluginCommQueue::channel(8);
        let run_handle = tokio::spawn(router.clone().run(comm_rx));

        let envelope = RequestEnvelope::new(RequestKind::MessageGet, "p1", 5.0, serde_json::json!({}));
        let request_id = envelope.request_id.clone();
        queue.put(envelope, Duration::from_millis(50)).await.unwrap();

        let response = response_queue.try_recv_within(Duration::from_millis(500)).await.unwrap();
        assert_eq!(response.request_id, request_id);
        run_handle.abort();
    }

    struct CollectingSink {
        items: parking_lot::Mutex<Vec<Value>>,
    }

    impl PushSink for Arc<CollectingSink> {
        fn accept(&self, _plugin_id: &str, item: Value) {
            self.items.lock().push(item);
        }
    }

    #[test]
    fn batch_reorder_sink_releases_in_seq_order_despite_arrival_order() {
        let sink = Arc::new(CollectingSink { items: parking_lot::Mutex::new(Vec::new()) });
        let reorder = BatchReorderSink::new(sink.clone());

        reorder.accept_batch("p1", vec![(2, Value::from(2)), (3, Value::from(3))]);
        // seq 1 hasn't arrived yet, so nothing should have released.
        assert!(sink.items.lock().is_empty());

        reorder.accept_batch("p1", vec![(1, Value::from(1))]);
        let items: Vec<i64> = sink.items.lock().iter().map(|v| v.as_i64().unwrap()).collect();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn batch_reorder_sink_tracks_buffers_independently_per_plugin() {
        let sink = Arc::new(CollectingSink { items: parking_lot::Mutex::new(Vec::new()) });
        let reorder = BatchReorderSink::new(sink.clone());

        reorder.accept_batch("p1", vec![(1, Value::from("a"))]);
        reorder.accept_batch("p2", vec![(1, Value::from("b"))]);
        let items: Vec<String> = sink.items.lock().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(items, vec!["a", "b"]);
    }
}
