//! The plugin context: the object handed to each plugin worker. Owns the
//! request/response queues, the optional low-latency client, the push
//! batcher lifecycle, and the pending-response map used for orphan
//! cleanup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use plugin_bus_core::{BusError, BusResult, RequestEnvelope, RequestKind, ResponseEnvelope};
use plugin_bus_transport::{
    Backoff, LowLatencyClient, MessageQueue, PluginCommQueue, PushBatcher, ResponseQueue,
    StateRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use crate::handler_scope::current_handler;
use crate::policy::{PolicyCache, SyncCallPolicy};

/// The `message_type` discriminant for a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Url,
    Binary,
    BinaryUrl,
}

/// The fields of a `push_message` call, gathered into one struct rather
/// than a nine-argument function.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub source: String,
    pub message_type: MessageType,
    pub description: String,
    pub priority: i64,
    pub content: Option<String>,
    pub binary_data: Option<String>,
    pub binary_url: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
    pub fast_mode: bool,
}

impl PushMessage {
    pub fn new(source: impl Into<String>, message_type: MessageType, description: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message_type,
            description: description.into(),
            priority: 0,
            content: None,
            binary_data: None,
            binary_url: None,
            metadata: serde_json::Map::new(),
            fast_mode: false,
        }
    }
}

/// Static configuration a [`PluginContext`] is built from.
pub struct PluginContextConfig {
    pub plugin_id: String,
    pub config_path: PathBuf,
    pub default_timeout: Duration,
    pub fast_push_batch_size: usize,
    pub fast_push_flush_interval: Duration,
    pub sync_call_default_policy: SyncCallPolicy,
}

/// The per-worker-process object a plugin uses to talk to the host and to
/// other plugins. Created once at worker startup, closed at worker exit.
pub struct PluginContext {
    plugin_id: String,
    default_timeout: Duration,
    fast_push_batch_size: usize,
    fast_push_flush_interval: Duration,

    plugin_comm_queue: PluginCommQueue,
    response_queue: AsyncMutex<Option<ResponseQueue>>,
    state_registry: Arc<dyn StateRegistry>,
    low_latency_client: Option<LowLatencyClient>,
    message_queue: MessageQueue,
    status_queue: MessageQueue,

    push_seq: AtomicU64,
    push_lock: AsyncMutex<()>,
    push_batcher: SyncMutex<Option<Arc<PushBatcher>>>,

    pending_responses: SyncMutex<HashMap<String, ResponseEnvelope>>,
    policy_cache: PolicyCache,
    closed: AtomicBool,
}

impl PluginContext {
    /// The default per-operation timeout (5s) used throughout the spec's
    /// operation table unless an operation documents otherwise.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    /// The default timeout for `trigger_plugin_event`.
    pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
    /// The default timeout for `update_own_config`.
    pub const CONFIG_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PluginContextConfig,
        plugin_comm_queue: PluginCommQueue,
        response_queue: Option<ResponseQueue>,
        state_registry: Arc<dyn StateRegistry>,
        low_latency_client: Option<LowLatencyClient>,
        message_queue: MessageQueue,
        status_queue: MessageQueue,
    ) -> Self {
        Self {
            plugin_id: config.plugin_id,
            default_timeout: config.default_timeout,
            fast_push_batch_size: config.fast_push_batch_size,
            fast_push_flush_interval: config.fast_push_flush_interval,
            plugin_comm_queue,
            response_queue: AsyncMutex::new(response_queue),
            state_registry,
            low_latency_client,
            message_queue,
            status_queue,
            push_seq: AtomicU64::new(0),
            push_lock: AsyncMutex::new(()),
            push_batcher: SyncMutex::new(None),
            pending_responses: SyncMutex::new(HashMap::new()),
            policy_cache: PolicyCache::new(config.config_path, config.sync_call_default_policy),
            closed: AtomicBool::new(false),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub(crate) fn comm_queue(&self) -> &PluginCommQueue {
        &self.plugin_comm_queue
    }

    // -- handler-scope policy -------------------------------------------------

    fn enforce_handler_scope_policy(&self, kind: RequestKind) -> BusResult<()> {
        let Some(handler) = current_handler() else {
            return Ok(());
        };
        match self.policy_cache.current() {
            SyncCallPolicy::Reject => Err(BusError::policy(kind.as_str(), handler)),
            SyncCallPolicy::Warn => {
                tracing::warn!(
                    method = kind.as_str(),
                    handler = %handler,
                    "sync bus call invoked inside handler scope; this may block the command loop"
                );
                Ok(())
            }
        }
    }

    fn require_no_running_scheduler(label: &str) -> BusResult<()> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BusError::usage(format!(
                "{label} is a blocking call and cannot run inside an active scheduler; use the async variant"
            )));
        }
        Ok(())
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to start a runtime for a blocking bus call")
            .block_on(fut)
    }

    // -- status -----------------------------------------------------------

    /// Enqueues a status update non-blockingly. Queue errors are logged and
    /// swallowed; this call never fails.
    pub async fn update_status(&self, status: Value) {
        let envelope = serde_json::json!({
            "type": "STATUS_UPDATE",
            "plugin_id": self.plugin_id,
            "data": status,
            "time": iso8601_now(),
        });
        if !self.status_queue.try_push(envelope) {
            tracing::warn!(plugin_id = %self.plugin_id, "status queue full; dropping status update");
        }
    }

    pub fn update_status_blocking(&self, status: Value) -> BusResult<()> {
        Self::require_no_running_scheduler("update_status")?;
        Self::block_on(self.update_status(status));
        Ok(())
    }

    // -- push_message -------------------------------------------------------

    fn build_push_envelope(&self, msg: &PushMessage, seq: u64, timeout_secs: f64) -> RequestEnvelope {
        let mut data = serde_json::Map::new();
        data.insert("seq".to_string(), serde_json::json!(seq));
        data.insert("source".to_string(), serde_json::json!(msg.source));
        data.insert("message_type".to_string(), serde_json::json!(msg.message_type));
        data.insert("description".to_string(), serde_json::json!(msg.description));
        data.insert("priority".to_string(), serde_json::json!(msg.priority));
        if let Some(content) = &msg.content {
            data.insert("content".to_string(), serde_json::json!(content));
        }
        if let Some(binary_data) = &msg.binary_data {
            data.insert("binary_data".to_string(), serde_json::json!(binary_data));
        }
        if let Some(binary_url) = &msg.binary_url {
            data.insert("binary_url".to_string(), serde_json::json!(binary_url));
        }
        data.insert("metadata".to_string(), Value::Object(msg.metadata.clone()));
        RequestEnvelope::new(
            RequestKind::MessagePush,
            &self.plugin_id,
            timeout_secs,
            Value::Object(data),
        )
    }

    fn ensure_batcher(&self, client: LowLatencyClient) -> Arc<PushBatcher> {
        let mut guard = self.push_batcher.lock();
        if let Some(batcher) = guard.as_ref() {
            return batcher.clone();
        }
        let batcher = Arc::new(PushBatcher::new(
            self.fast_push_batch_size,
            self.fast_push_flush_interval,
            Arc::new(client),
        ));
        *guard = Some(batcher.clone());
        batcher
    }

    /// Pushes a message via the fast datagram-batched route (`fast_mode` and
    /// a low-latency client configured) or the reliable route (bounded
    /// retry loop over the datagram client, or the plain queue fallback).
    pub async fn push_message(&self, msg: PushMessage, timeout: Duration) -> BusResult<()> {
        self.enforce_handler_scope_policy(RequestKind::MessagePush)?;

        if msg.fast_mode {
            if let Some(client) = self.low_latency_client.clone() {
                return self.push_fast(msg, client, timeout).await;
            }
        }
        self.push_reliable(msg, timeout).await
    }

    async fn push_fast(&self, msg: PushMessage, client: LowLatencyClient, timeout: Duration) -> BusResult<()> {
        let _guard = self.push_lock.lock().await;
        let seq = self.push_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = self.build_push_envelope(&msg, seq, timeout.as_secs_f64());
        let value = serde_json::to_value(&envelope).map_err(|err| BusError::usage(err.to_string()))?;
        let batcher = self.ensure_batcher(client);
        batcher.push(value);
        Ok(())
    }

    async fn push_reliable(&self, msg: PushMessage, timeout: Duration) -> BusResult<()> {
        let _guard = self.push_lock.lock().await;
        let seq = self.push_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = self.build_push_envelope(&msg, seq, timeout.as_secs_f64());

        if let Some(client) = &self.low_latency_client {
            let deadline = Instant::now() + timeout;
            let mut backoff = Backoff::default();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(BusError::timeout(RequestKind::MessagePush.as_str(), timeout.as_secs_f64()));
                }
                let attempt_timeout = remaining.min(Duration::from_secs(1));
                if let Ok(resp) = client.send_request(envelope.clone(), attempt_timeout).await {
                    if !resp.is_error() {
                        return Ok(());
                    }
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(BusError::timeout(RequestKind::MessagePush.as_str(), timeout.as_secs_f64()));
                }
                let delay = Backoff::clamp_to_remaining(backoff.next_delay(), remaining);
                tokio::time::sleep(delay).await;
            }
        }

        let value = serde_json::to_value(&envelope).map_err(|err| BusError::usage(err.to_string()))?;
        if !self.message_queue.try_push(value) {
            tracing::warn!(plugin_id = %self.plugin_id, "message queue full; dropping push");
        }
        Ok(())
    }

    pub fn push_message_blocking(&self, msg: PushMessage, timeout: Duration) -> BusResult<()> {
        Self::require_no_running_scheduler("push_message")?;
        Self::block_on(self.push_message(msg, timeout))
    }

    // -- the round-trip algorithm --------------------------------------------

    fn take_pending(&self, request_id: &str) -> Option<ResponseEnvelope> {
        self.pending_responses.lock().remove(request_id)
    }

    fn deposit_pending(&self, response: ResponseEnvelope) {
        self.pending_responses
            .lock()
            .insert(response.request_id.clone(), response);
    }

    fn wrap_result(value: Value) -> Value {
        match value {
            Value::Object(_) | Value::Array(_) => value,
            other => serde_json::json!({ "result": other }),
        }
    }

    fn finish(response: ResponseEnvelope) -> BusResult<Value> {
        match response.into_result() {
            Ok(value) => Ok(Self::wrap_result(value)),
            Err(error) => Err(BusError::Remote(error)),
        }
    }

    /// All typed queries (bus clients, config, memory, inter-plugin events)
    /// share this round-trip: put the request on the queue, then look for
    /// its response in the pending map, the response queue, or the state
    /// registry, in that order, with orphan cleanup on timeout.
    pub async fn send_request_and_wait(
        &self,
        kind: RequestKind,
        data: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        self.enforce_handler_scope_policy(kind)?;

        let envelope = RequestEnvelope::new(kind, &self.plugin_id, timeout.as_secs_f64(), data);
        let request_id = envelope.request_id.clone();

        self.plugin_comm_queue
            .put(envelope, timeout)
            .await
            .map_err(|err| BusError::Transport(err.to_string()))?;

        let deadline = Instant::now() + timeout;

        if let Some(response) = self.take_pending(&request_id) {
            return Self::finish(response);
        }

        {
            let mut response_queue = self.response_queue.lock().await;
            if let Some(queue) = response_queue.as_mut() {
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let read_timeout = remaining.min(Duration::from_millis(50));
                    if let Some(response) = queue.try_recv_within(read_timeout).await {
                        if response.request_id == request_id {
                            return Self::finish(response);
                        }
                        self.deposit_pending(response);
                    }
                }
            } else {
                drop(response_queue);
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    if let Some(response) = self.state_registry.get_plugin_response(&request_id) {
                        return Self::finish(response);
                    }
                    tokio::time::sleep(Duration::from_millis(10).min(remaining)).await;
                }
            }
        }

        // Orphan cleanup: a response that arrived just after our deadline
        // must still be consumed so it doesn't leak in the state registry.
        if let Some(response) = self.state_registry.get_plugin_response(&request_id) {
            tracing::warn!(request_id = %request_id, "delayed response");
            return Self::finish(response);
        }

        Err(BusError::timeout(kind.as_str(), timeout.as_secs_f64()))
    }

    /// Used by operations that prefer the low-latency client with no
    /// fallback to the reliable queue (the memory client's `get`): if a
    /// low-latency client is configured, the request goes out over it and
    /// any failure surfaces directly as a timeout/transport error. Only
    /// falls back to the queued round trip when no such client exists.
    pub async fn send_request_preferring_fast_path(
        &self,
        kind: RequestKind,
        data: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        self.enforce_handler_scope_policy(kind)?;
        if let Some(client) = &self.low_latency_client {
            let envelope = RequestEnvelope::new(kind, &self.plugin_id, timeout.as_secs_f64(), data);
            let response = client
                .send_request(envelope, timeout)
                .await
                .map_err(|_| BusError::timeout(kind.as_str(), timeout.as_secs_f64()))?;
            return Self::finish(response);
        }
        self.send_request_and_wait(kind, data, timeout).await
    }

    // -- higher-level operations ----------------------------------------------

    pub async fn trigger_plugin_event(
        &self,
        target: impl Into<String>,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        args: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        let data = serde_json::json!({
            "target": target.into(),
            "event_type": event_type.into(),
            "event_id": event_id.into(),
            "args": args,
        });
        self.send_request_and_wait(RequestKind::PluginToPlugin, data, timeout).await
    }

    pub fn trigger_plugin_event_blocking(
        &self,
        target: impl Into<String>,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        args: Value,
        timeout: Duration,
    ) -> BusResult<Value> {
        Self::require_no_running_scheduler("trigger_plugin_event")?;
        Self::block_on(self.trigger_plugin_event(target, event_type, event_id, args, timeout))
    }

    pub async fn query_plugins(&self, filters: Option<Value>, timeout: Duration) -> BusResult<Value> {
        let data = serde_json::json!({ "filters": filters });
        self.send_request_and_wait(RequestKind::PluginQuery, data, timeout).await
    }

    pub async fn get_own_config(&self, timeout: Duration) -> BusResult<Value> {
        self.send_request_and_wait(RequestKind::PluginConfigGet, Value::Null, timeout)
            .await
    }

    pub async fn get_system_config(&self, timeout: Duration) -> BusResult<Value> {
        self.send_request_and_wait(RequestKind::PluginSystemConfigGet, Value::Null, timeout)
            .await
    }

    pub async fn update_own_config(&self, updates: Value, timeout: Duration) -> BusResult<Value> {
        let data = serde_json::json!({ "updates": updates });
        self.send_request_and_wait(RequestKind::PluginConfigUpdate, data, timeout).await
    }

    pub fn update_own_config_blocking(&self, updates: Value, timeout: Duration) -> BusResult<Value> {
        Self::require_no_running_scheduler("update_own_config")?;
        Self::block_on(self.update_own_config(updates, timeout))
    }

    pub async fn query_memory(
        &self,
        lanlan_name: impl Into<String>,
        query: impl Into<String>,
        timeout: Duration,
    ) -> BusResult<Value> {
        let data = serde_json::json!({
            "lanlan_name": lanlan_name.into(),
            "query": query.into(),
        });
        self.send_request_and_wait(RequestKind::MemoryQuery, data, timeout).await
    }

    // -- lifecycle ------------------------------------------------------------

    /// Stops the push batcher (if one was ever started) within its bounded
    /// flush window. Idempotent and best-effort: never fails.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let batcher = self.push_batcher.lock().clone();
        if let Some(batcher) = batcher {
            batcher.close().await;
        }
    }
}

/// Best-effort cleanup mirroring `close()`, for contexts dropped without an
/// explicit `close().await`. Can only signal the batcher to stop, not wait
/// for its final flush — a `Drop` impl has no `.await` point — so an
/// explicit `close()` call remains the preferred shutdown path.
impl Drop for PluginContext {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(batcher) = self.push_batcher.lock().take() {
            batcher.signal_stop();
        }
    }
}

fn iso8601_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_bus_transport::InMemoryStateRegistry;

    fn test_config() -> PluginContextConfig {
        PluginContextConfig {
            plugin_id: "p1".to_string(),
            config_path: PathBuf::from("/nonexistent/plugin.toml"),
            default_timeout: Duration::from_secs(5),
            fast_push_batch_size: 10,
            fast_push_flush_interval: Duration::from_millis(50),
            sync_call_default_policy: SyncCallPolicy::Warn,
        }
    }

    fn build_context() -> (PluginContext, plugin_bus_transport::PluginCommQueueReceiver) {
        let (comm_queue, comm_rx) = PluginCommQueue::channel(16);
        let (message_queue, _message_rx) = MessageQueue::channel(16);
        let (status_queue, _status_rx) = MessageQueue::channel(16);
        let registry: Arc<dyn StateRegistry> = Arc::new(InMemoryStateRegistry::new());
        let context = PluginContext::new(
            test_config(),
            comm_queue,
            None,
            registry,
            None,
            message_queue,
            status_queue,
        );
        (context, comm_rx)
    }

    #[tokio::test]
    async fn round_trip_resolves_via_state_registry() {
        let (comm_queue, mut comm_rx) = PluginCommQueue::channel(16);
        let (message_queue, _message_rx) = MessageQueue::channel(16);
        let (status_queue, _status_rx) = MessageQueue::channel(16);
        let registry = Arc::new(InMemoryStateRegistry::new());
        let context = PluginContext::new(
            test_config(),
            comm_queue,
            None,
            registry.clone(),
            None,
            message_queue,
            status_queue,
        );

        let responder = tokio::spawn(async move {
            let envelope = comm_rx.recv().await.unwrap();
            registry.put_plugin_response(ResponseEnvelope::success(
                envelope.request_id,
                serde_json::json!({"history": []}),
            ));
        });

        let result = context
            .send_request_and_wait(RequestKind::UserContextGet, Value::Null, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["history"], serde_json::json!([]));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_zero_fails_immediately() {
        let (context, _rx) = build_context();
        let result = context
            .send_request_and_wait(RequestKind::UserContextGet, Value::Null, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(BusError::Timeout { .. })));
    }

    #[tokio::test]
    async fn handler_scope_reject_blocks_the_call_before_any_ipc() {
        use futures::FutureExt;

        let (comm_queue, mut comm_rx) = PluginCommQueue::channel(16);
        let (message_queue, _message_rx) = MessageQueue::channel(16);
        let (status_queue, _status_rx) = MessageQueue::channel(16);
        let registry: Arc<dyn StateRegistry> = Arc::new(InMemoryStateRegistry::new());
        let mut config = test_config();
        config.sync_call_default_policy = SyncCallPolicy::Reject;
        let context = PluginContext::new(config, comm_queue, None, registry, None, message_queue, status_queue);

        let result = crate::handler_scope::run_in_handler_scope("on_message", async {
            context
                .send_request_and_wait(RequestKind::UserContextGet, Value::Null, Duration::from_secs(1))
                .await
        })
        .await;

        assert!(matches!(result, Err(BusError::Policy { .. })));
        assert!(comm_rx.recv().now_or_never().is_none());
    }

    #[test]
    fn push_seq_is_monotonic() {
        let (context, _rx) = build_context();
        let first = context.push_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let second = context.push_seq.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (context, _rx) = build_context();
        context.close().await;
        context.close().await;
    }

    #[tokio::test]
    async fn dropping_after_close_does_not_signal_the_batcher_again() {
        let (context, _rx) = build_context();
        context.close().await;
        // Drop runs close()'s fallback path; `closed` is already set, so it
        // must short-circuit rather than touching a batcher a second time.
        drop(context);
    }

    #[tokio::test]
    async fn bus_hub_builds_independent_clients_sharing_the_same_context() {
        let (context, _rx) = build_context();
        let context = Arc::new(context);
        let hub = context.bus();
        assert!(hub.memory.get("", 1, Duration::from_millis(1)).await.is_err());
    }
}
