//! Bus record types and the filter/where/limit/merge algebra over typed lists.
//!
//! Every record carries the same common envelope (kind, type, timestamp,
//! plugin id, source, priority, content, metadata, and the verbatim raw
//! payload it was parsed from) plus subtype-specific fields. Parsing is
//! total: a missing or ill-typed field falls back to a documented default
//! rather than failing.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The four record kinds the bus routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Memory,
    Message,
    Event,
    Lifecycle,
}

impl BusKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Message => "message",
            Self::Event => "event",
            Self::Lifecycle => "lifecycle",
        }
    }
}

/// Fields common to every bus record, regardless of subtype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRecord {
    pub kind: BusKind,
    #[serde(rename = "type")]
    pub record_type: String,
    pub timestamp: Option<f64>,
    pub plugin_id: Option<String>,
    pub source: Option<String>,
    pub priority: i64,
    pub content: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    /// The exact payload this record was parsed from, kept for audit and
    /// for fields individual subtypes don't surface.
    pub raw: Value,
}

fn raw_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

fn raw_str_any<'a>(raw: &Value, keys: impl IntoIterator<Item = &'a str>) -> Option<String> {
    keys.into_iter().find_map(|key| raw_str(raw, key))
}

impl BusRecord {
    /// Parses the common fields out of a raw payload. `default_type` is the
    /// kind-specific sentinel used when the payload carries no `type` field.
    pub fn from_raw(raw: &Value, kind: BusKind, default_type: &str) -> Self {
        let record_type = raw_str(raw, "type").unwrap_or_else(|| default_type.to_string());
        let timestamp = raw
            .get("timestamp")
            .or_else(|| raw.get("_ts"))
            .and_then(Value::as_f64);
        let plugin_id = raw_str(raw, "plugin_id");
        let source = raw_str(raw, "source");
        let priority = raw.get("priority").and_then(Value::as_i64).unwrap_or(0);
        let content = raw_str(raw, "content");
        let metadata = raw
            .get("metadata")
            .and_then(Value::as_object)
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default();

        Self {
            kind,
            record_type,
            timestamp,
            plugin_id,
            source,
            priority,
            content,
            metadata,
            raw: raw.clone(),
        }
    }

    /// The normalized JSON form of this record: fields coerced, defaults
    /// filled in. This is what [`BusList::dump`] serializes, not the raw
    /// payload the record was parsed from.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "type": self.record_type,
            "timestamp": self.timestamp,
            "plugin_id": self.plugin_id,
            "source": self.source,
            "priority": self.priority,
            "content": self.content,
            "metadata": self.metadata,
        })
    }
}

/// Records a query or transform that produced a [`BusList`], for debugging
/// and for the trace surfaced alongside query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusOp {
    pub op: String,
    pub params: Value,
    pub at: f64,
}

impl BusOp {
    pub fn new(op: impl Into<String>, params: Value, at: f64) -> Self {
        Self {
            op: op.into(),
            params,
            at,
        }
    }
}

/// The query plan node attached to a list returned by a bus client's `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPlan {
    pub node: String,
    pub params: Value,
}

impl GetPlan {
    pub fn get(params: Value) -> Self {
        Self {
            node: "GetNode".to_string(),
            params,
        }
    }
}

/// Conjunctive filter over common record fields. Every `Some` field must
/// match; a `None` field matches anything. A `since_ts`/`until_ts` bound
/// against a record with no `timestamp` always fails (missing timestamps
/// never satisfy a time-bound filter).
#[derive(Debug, Clone, Default)]
pub struct BusFilter {
    pub kind: Option<BusKind>,
    pub record_type: Option<String>,
    pub plugin_id: Option<String>,
    pub source: Option<String>,
    pub priority_min: Option<i64>,
    pub since_ts: Option<f64>,
    pub until_ts: Option<f64>,
}

impl BusFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: BusKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn priority_min(mut self, priority_min: i64) -> Self {
        self.priority_min = Some(priority_min);
        self
    }

    pub fn since_ts(mut self, since_ts: f64) -> Self {
        self.since_ts = Some(since_ts);
        self
    }

    pub fn until_ts(mut self, until_ts: f64) -> Self {
        self.until_ts = Some(until_ts);
        self
    }

    /// Conjoins `self` and `other` field-by-field; `other` wins where both
    /// are set. `a.and(b)` is what two chained `filter` calls produce, so
    /// `list.filter(a).filter(b) == list.filter(a.and(b))`.
    pub fn and(mut self, other: BusFilter) -> Self {
        if other.kind.is_some() {
            self.kind = other.kind;
        }
        if other.record_type.is_some() {
            self.record_type = other.record_type;
        }
        if other.plugin_id.is_some() {
            self.plugin_id = other.plugin_id;
        }
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.priority_min.is_some() {
            self.priority_min = other.priority_min;
        }
        if other.since_ts.is_some() {
            self.since_ts = other.since_ts;
        }
        if other.until_ts.is_some() {
            self.until_ts = other.until_ts;
        }
        self
    }

    pub fn matches(&self, record: &BusRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(record_type) = &self.record_type {
            if &record.record_type != record_type {
                return false;
            }
        }
        if let Some(plugin_id) = &self.plugin_id {
            if record.plugin_id.as_deref() != Some(plugin_id.as_str()) {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if record.source.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(priority_min) = self.priority_min {
            if record.priority < priority_min {
                return false;
            }
        }
        if self.since_ts.is_some() || self.until_ts.is_some() {
            let Some(timestamp) = record.timestamp else {
                return false;
            };
            if let Some(since_ts) = self.since_ts {
                if timestamp < since_ts {
                    return false;
                }
            }
            if let Some(until_ts) = self.until_ts {
                if timestamp > until_ts {
                    return false;
                }
            }
        }
        true
    }
}

/// Implemented by every record subtype so the generic [`BusList`] machinery
/// can read the common fields without knowing the concrete type.
pub trait RecordCommon {
    fn common(&self) -> &BusRecord;
}

/// A bus record drawn from the per-user/per-session memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    #[serde(flatten)]
    pub common: BusRecord,
    pub bucket_id: String,
}

impl MemoryRecord {
    /// `bucket_id` is the bucket the query was issued against, not a field
    /// carried in the payload itself.
    pub fn from_raw(raw: &Value, bucket_id: impl Into<String>) -> Self {
        Self {
            common: BusRecord::from_raw(raw, BusKind::Memory, "memory"),
            bucket_id: bucket_id.into(),
        }
    }
}

impl RecordCommon for MemoryRecord {
    fn common(&self) -> &BusRecord {
        &self.common
    }
}

/// A message pushed or retrieved through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(flatten)]
    pub common: BusRecord,
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    pub description: Option<String>,
}

impl MessageRecord {
    pub fn from_raw(raw: &Value) -> Self {
        let common = BusRecord::from_raw(raw, BusKind::Message, "message");
        let message_id = raw_str(raw, "message_id");
        // `type` normalizes onto `message_type` when the payload carries one.
        let message_type = raw_str(raw, "message_type").or_else(|| raw_str(raw, "type"));
        let description = raw_str(raw, "description");
        Self {
            common,
            message_id,
            message_type,
            description,
        }
    }
}

impl RecordCommon for MessageRecord {
    fn common(&self) -> &BusRecord {
        &self.common
    }
}

/// A cross-plugin or ingress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(flatten)]
    pub common: BusRecord,
    pub event_id: Option<String>,
    pub entry_id: Option<String>,
    pub args: Option<Value>,
}

impl EventRecord {
    pub fn from_raw(raw: &Value) -> Self {
        let mut common = BusRecord::from_raw(raw, BusKind::Event, "event");
        let event_id = raw_str(raw, "event_id");
        let entry_id = raw_str_any(raw, ["entry_id", "trace_id", "event_id"]);
        let args = raw.get("args").cloned();
        if common.content.is_none() {
            common.content = entry_id.clone();
        }
        Self {
            common,
            event_id,
            entry_id,
            args,
        }
    }
}

impl RecordCommon for EventRecord {
    fn common(&self) -> &BusRecord {
        &self.common
    }
}

/// A plugin lifecycle transition (spawned, ready, stopped, crashed, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    #[serde(flatten)]
    pub common: BusRecord,
    pub lifecycle_id: Option<String>,
    pub detail: Option<Value>,
}

impl LifecycleRecord {
    pub fn from_raw(raw: &Value) -> Self {
        let common = BusRecord::from_raw(raw, BusKind::Lifecycle, "lifecycle");
        let lifecycle_id = raw_str_any(raw, ["lifecycle_id", "trace_id"]);
        let detail = raw.get("detail").cloned();
        Self {
            common,
            lifecycle_id,
            detail,
        }
    }
}

impl RecordCommon for LifecycleRecord {
    fn common(&self) -> &BusRecord {
        &self.common
    }
}

/// A homogeneous, ordered sequence of records of one subtype, carrying the
/// trace of operations that produced it.
#[derive(Debug, Clone)]
pub struct BusList<T> {
    items: Vec<T>,
    plugin_id: Option<String>,
    ops: Vec<BusOp>,
    plan: Option<GetPlan>,
    fast_mode: Option<bool>,
}

impl<T> BusList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            plugin_id: None,
            ops: Vec::new(),
            plan: None,
            fast_mode: None,
        }
    }

    pub fn with_plugin_id(mut self, plugin_id: Option<String>) -> Self {
        self.plugin_id = plugin_id;
        self
    }

    pub fn with_plan(mut self, plan: GetPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_fast_mode(mut self, fast_mode: bool) -> Self {
        self.fast_mode = Some(fast_mode);
        self
    }

    pub fn push_op(&mut self, op: BusOp) {
        self.ops.push(op);
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn plugin_id(&self) -> Option<&str> {
        self.plugin_id.as_deref()
    }

    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    pub fn plan(&self) -> Option<&GetPlan> {
        self.plan.as_ref()
    }

    pub fn fast_mode(&self) -> Option<bool> {
        self.fast_mode
    }

    /// `where`: keeps items satisfying an arbitrary predicate. Named `where_`
    /// because `where` is a reserved word.
    pub fn where_(self, predicate: impl Fn(&T) -> bool) -> Self {
        let BusList {
            items,
            plugin_id,
            mut ops,
            plan,
            fast_mode,
        } = self;
        ops.push(BusOp::new("where", Value::Null, now_ts()));
        Self {
            items: items.into_iter().filter(predicate).collect(),
            plugin_id,
            ops,
            plan,
            fast_mode,
        }
    }

    /// Keeps the first `n` items. `n <= 0` yields an empty list.
    pub fn limit(self, n: i64) -> Self {
        let BusList {
            items,
            plugin_id,
            mut ops,
            plan,
            fast_mode,
        } = self;
        let kept = if n <= 0 {
            Vec::new()
        } else {
            items.into_iter().take(n as usize).collect()
        };
        ops.push(BusOp::new("limit", serde_json::json!(n), now_ts()));
        Self {
            items: kept,
            plugin_id,
            ops,
            plan,
            fast_mode,
        }
    }

    /// Concatenates two lists. The merged `plugin_id` is the common id of
    /// both lists, or the wildcard `"*"` when they differ.
    pub fn merge(mut self, mut other: Self) -> Self {
        let plugin_id = match (&self.plugin_id, &other.plugin_id) {
            (Some(a), Some(b)) if a == b => Some(a.clone()),
            (None, None) => None,
            _ => Some("*".to_string()),
        };
        self.items.append(&mut other.items);
        self.ops.append(&mut other.ops);
        self.ops.push(BusOp::new("merge", Value::Null, now_ts()));
        Self {
            items: self.items,
            plugin_id,
            ops: self.ops,
            plan: self.plan.or(other.plan),
            fast_mode: self.fast_mode.or(other.fast_mode),
        }
    }
}

impl<T: RecordCommon> BusList<T> {
    /// Keeps items whose common fields satisfy `filter`, conjunctively with
    /// whatever filters already produced this list.
    pub fn filter(self, filter: BusFilter) -> Self {
        let BusList {
            items,
            plugin_id,
            mut ops,
            plan,
            fast_mode,
        } = self;
        ops.push(BusOp::new(
            "filter",
            serde_json::json!({
                "kind": filter.kind.map(BusKind::as_str),
                "type": filter.record_type,
                "plugin_id": filter.plugin_id,
                "source": filter.source,
                "priority_min": filter.priority_min,
                "since_ts": filter.since_ts,
                "until_ts": filter.until_ts,
            }),
            now_ts(),
        ));
        Self {
            items: items
                .into_iter()
                .filter(|item| filter.matches(item.common()))
                .collect(),
            plugin_id,
            ops,
            plan,
            fast_mode,
        }
    }
}

impl<T> BusList<T>
where
    T: RecordCommon,
{
    /// The normalized JSON form of every item in the list.
    pub fn dump(&self) -> Vec<Value> {
        self.items.iter().map(|item| item.common().to_json()).collect()
    }
}

pub type MemoryList = BusList<MemoryRecord>;
pub type MessageList = BusList<MessageRecord>;
pub type EventList = BusList<EventRecord>;
pub type LifecycleList = BusList<LifecycleRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(plugin_id: &str, priority: i64, ts: Option<f64>) -> MessageRecord {
        let raw = serde_json::json!({
            "plugin_id": plugin_id,
            "priority": priority,
            "timestamp": ts,
            "message_id": "m1",
            "type": "text",
        });
        MessageRecord::from_raw(&raw)
    }

    #[test]
    fn message_record_normalizes_type_onto_message_type() {
        let raw = serde_json::json!({"type": "binary_url", "message_id": "m1"});
        let record = MessageRecord::from_raw(&raw);
        assert_eq!(record.message_type.as_deref(), Some("binary_url"));
        assert_eq!(record.common.record_type, "binary_url");
    }

    #[test]
    fn event_record_content_falls_back_to_entry_id() {
        let raw = serde_json::json!({"trace_id": "t-1"});
        let record = EventRecord::from_raw(&raw);
        assert_eq!(record.entry_id.as_deref(), Some("t-1"));
        assert_eq!(record.common.content.as_deref(), Some("t-1"));
    }

    #[test]
    fn lifecycle_record_id_falls_back_to_trace_id() {
        let raw = serde_json::json!({"trace_id": "t-2"});
        let record = LifecycleRecord::from_raw(&raw);
        assert_eq!(record.lifecycle_id.as_deref(), Some("t-2"));
    }

    #[test]
    fn filter_composition_matches_conjunction() {
        let list = MessageList::new(vec![
            msg("p1", 5, Some(10.0)),
            msg("p2", 5, Some(10.0)),
            msg("p1", 1, Some(10.0)),
        ]);

        let chained = list
            .clone()
            .filter(BusFilter::new().plugin_id("p1"))
            .filter(BusFilter::new().priority_min(5));

        let conjunction = list.filter(BusFilter::new().plugin_id("p1").priority_min(5));

        assert_eq!(chained.len(), 1);
        assert_eq!(chained.len(), conjunction.len());
    }

    #[test]
    fn filter_is_idempotent_for_repeated_predicate() {
        let list = MessageList::new(vec![msg("p1", 5, Some(10.0))]);
        let once = list.clone().filter(BusFilter::new().plugin_id("p1"));
        let twice = list
            .filter(BusFilter::new().plugin_id("p1"))
            .filter(BusFilter::new().plugin_id("p1"));
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn missing_timestamp_fails_time_bound_filter() {
        let list = MessageList::new(vec![msg("p1", 5, None)]);
        let filtered = list.filter(BusFilter::new().since_ts(0.0));
        assert!(filtered.is_empty());
    }

    #[test]
    fn limit_zero_and_negative_yield_empty() {
        let list = MessageList::new(vec![msg("p1", 1, None), msg("p1", 2, None)]);
        assert!(list.clone().limit(0).is_empty());
        assert!(list.limit(-1).is_empty());
    }

    #[test]
    fn merge_concatenates_and_resolves_plugin_id() {
        let a = MessageList::new(vec![msg("p1", 1, None)]).with_plugin_id(Some("p1".into()));
        let b = MessageList::new(vec![msg("p1", 2, None)]).with_plugin_id(Some("p1".into()));
        let merged = a.merge(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.plugin_id(), Some("p1"));

        let c = MessageList::new(vec![msg("p2", 1, None)]).with_plugin_id(Some("p2".into()));
        let d = MessageList::new(vec![msg("p1", 1, None)]).with_plugin_id(Some("p1".into()));
        let merged = c.merge(d);
        assert_eq!(merged.plugin_id(), Some("*"));
    }

    #[test]
    fn memory_record_dump_normalizes_fields() {
        let raw = serde_json::json!({"_ts": 1_700_000_000.0, "content": "hi", "plugin_id": "p1"});
        let record = MemoryRecord::from_raw(&raw, "u1");
        assert_eq!(record.bucket_id, "u1");
        assert_eq!(record.common.timestamp, Some(1_700_000_000.0));
        let list = MemoryList::new(vec![record]);
        let dumped = list.dump();
        assert_eq!(dumped[0]["content"], "hi");
        assert_eq!(dumped[0]["timestamp"], 1_700_000_000.0);
    }
}
