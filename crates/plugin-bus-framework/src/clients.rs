//! Typed bus clients: thin façades over [`PluginContext::send_request_and_wait`]
//! that parse the raw JSON result into a [`BusList`] and attach the trace
//! entry and plan every `get` records.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use plugin_bus_core::{
    BusError, BusOp, BusResult, EventList, EventRecord, GetPlan, LifecycleList, LifecycleRecord,
    MemoryList, MemoryRecord, MessageList, MessageRecord, RequestKind,
};
use serde_json::Value;

use crate::context::PluginContext;

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `None` stays `None`, `""` normalizes to `None`, everything else
/// (including the `"*"` wildcard) passes through verbatim.
fn normalize_plugin_id(plugin_id: Option<String>) -> Option<String> {
    plugin_id.filter(|id| !id.is_empty())
}

fn coerce_list(result: &Value, key: &str) -> Vec<Value> {
    if let Some(items) = result.get(key).and_then(Value::as_array) {
        return items.clone();
    }
    if let Some(items) = result.as_array() {
        return items.clone();
    }
    Vec::new()
}

/// `bus.memory` — per-bucket conversational/user context history.
#[derive(Clone)]
pub struct MemoryClient {
    context: Arc<PluginContext>,
}

impl MemoryClient {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self { context }
    }

    /// Fetches up to `limit` memory records for `bucket_id`. Prefers the
    /// low-latency client with no fallback when one is configured; any
    /// failure there surfaces as a timeout rather than retrying on the
    /// reliable queue.
    pub async fn get(&self, bucket_id: impl Into<String>, limit: u32, timeout: Duration) -> BusResult<MemoryList> {
        let bucket_id = bucket_id.into();
        if bucket_id.is_empty() {
            return Err(BusError::usage("bucket_id must not be empty"));
        }

        let params = serde_json::json!({ "bucket_id": bucket_id, "limit": limit });
        let result = self
            .context
            .send_request_preferring_fast_path(RequestKind::UserContextGet, params.clone(), timeout)
            .await?;

        let items = coerce_list(&result, "history")
            .into_iter()
            .map(|raw| MemoryRecord::from_raw(&raw, bucket_id.clone()))
            .collect::<Vec<_>>();

        let mut list = MemoryList::new(items).with_plan(GetPlan::get(params.clone()));
        list.push_op(BusOp::new("get", params, now_ts()));
        Ok(list)
    }
}

/// `bus.messages` — inter-plugin messages pushed via `push_message`.
#[derive(Clone)]
pub struct MessagesClient {
    context: Arc<PluginContext>,
}

impl MessagesClient {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self { context }
    }

    pub async fn get(
        &self,
        plugin_id: Option<String>,
        max_count: u32,
        priority_min: Option<i64>,
        timeout: Duration,
    ) -> BusResult<MessageList> {
        let plugin_id = normalize_plugin_id(plugin_id);
        let params = serde_json::json!({
            "plugin_id": plugin_id,
            "max_count": max_count,
            "priority_min": priority_min,
        });
        let result = self
            .context
            .send_request_and_wait(RequestKind::MessageGet, params.clone(), timeout)
            .await?;

        let items = coerce_list(&result, "messages")
            .iter()
            .map(MessageRecord::from_raw)
            .collect::<Vec<_>>();

        let mut list = MessageList::new(items)
            .with_plugin_id(plugin_id)
            .with_plan(GetPlan::get(params.clone()));
        list.push_op(BusOp::new("get", params, now_ts()));
        Ok(list)
    }

    pub async fn delete(&self, message_id: impl Into<String>, timeout: Duration) -> BusResult<bool> {
        let message_id = message_id.into();
        if message_id.is_empty() {
            return Err(BusError::usage("message_id must not be empty"));
        }
        let data = serde_json::json!({ "message_id": message_id });
        let result = self
            .context
            .send_request_and_wait(RequestKind::MessageDel, data, timeout)
            .await?;
        Ok(result.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// `bus.events` — cross-plugin and ingress events. Symmetric to
/// [`MessagesClient`], modulo `event_id` in place of `message_id`.
#[derive(Clone)]
pub struct EventsClient {
    context: Arc<PluginContext>,
}

impl EventsClient {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self { context }
    }

    pub async fn get(&self, plugin_id: Option<String>, max_count: u32, timeout: Duration) -> BusResult<EventList> {
        let plugin_id = normalize_plugin_id(plugin_id);
        let params = serde_json::json!({ "plugin_id": plugin_id, "max_count": max_count });
        let result = self
            .context
            .send_request_and_wait(RequestKind::EventGet, params.clone(), timeout)
            .await?;

        let items = coerce_list(&result, "events")
            .iter()
            .map(EventRecord::from_raw)
            .collect::<Vec<_>>();

        let mut list = EventList::new(items)
            .with_plugin_id(plugin_id)
            .with_plan(GetPlan::get(params.clone()));
        list.push_op(BusOp::new("get", params, now_ts()));
        Ok(list)
    }

    pub async fn delete(&self, event_id: impl Into<String>, timeout: Duration) -> BusResult<bool> {
        let event_id = event_id.into();
        if event_id.is_empty() {
            return Err(BusError::usage("event_id must not be empty"));
        }
        let data = serde_json::json!({ "event_id": event_id });
        let result = self
            .context
            .send_request_and_wait(RequestKind::EventDel, data, timeout)
            .await?;
        Ok(result.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// `bus.lifecycle` — plugin lifecycle transitions (spawned, ready, stopped,
/// crashed, ...).
#[derive(Clone)]
pub struct LifecycleClient {
    context: Arc<PluginContext>,
}

impl LifecycleClient {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self { context }
    }

    pub async fn get(
        &self,
        plugin_id: Option<String>,
        max_count: u32,
        since_ts: Option<f64>,
        timeout: Duration,
    ) -> BusResult<LifecycleList> {
        let plugin_id = normalize_plugin_id(plugin_id);
        let params = serde_json::json!({
            "plugin_id": plugin_id,
            "max_count": max_count,
            "since_ts": since_ts,
        });
        let result = self
            .context
            .send_request_and_wait(RequestKind::LifecycleGet, params.clone(), timeout)
            .await?;

        let items = coerce_list(&result, "lifecycle")
            .iter()
            .map(LifecycleRecord::from_raw)
            .collect::<Vec<_>>();

        let mut list = LifecycleList::new(items)
            .with_plugin_id(plugin_id)
            .with_plan(GetPlan::get(params.clone()));
        list.push_op(BusOp::new("get", params, now_ts()));
        Ok(list)
    }

    pub async fn delete(&self, lifecycle_id: impl Into<String>, timeout: Duration) -> BusResult<bool> {
        let lifecycle_id = lifecycle_id.into();
        if lifecycle_id.is_empty() {
            return Err(BusError::usage("lifecycle_id must not be empty"));
        }
        let data = serde_json::json!({ "lifecycle_id": lifecycle_id });
        let result = self
            .context
            .send_request_and_wait(RequestKind::LifecycleDel, data, timeout)
            .await?;
        Ok(result.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }
}

/// A per-access bundle of the four typed bus clients. Each field is just a
/// thin wrapper around one `Arc<PluginContext>` clone, so unlike the
/// original's `functools.cached_property`-memoized hub, `bus()` doesn't
/// memoize these on the context itself: doing so would hold a strong
/// `Arc<PluginContext>` back from the context to its own clients, an Arc
/// cycle the context would never fully drop.
pub struct BusHub {
    pub memory: MemoryClient,
    pub messages: MessagesClient,
    pub events: EventsClient,
    pub lifecycle: LifecycleClient,
}

impl PluginContext {
    /// Builds a fresh [`BusHub`] over this context.
    pub fn bus(self: &Arc<Self>) -> BusHub {
        BusHub {
            memory: MemoryClient::new(self.clone()),
            messages: MessagesClient::new(self.clone()),
            events: EventsClient::new(self.clone()),
            lifecycle: LifecycleClient::new(self.clone()),
        }
    }
}
