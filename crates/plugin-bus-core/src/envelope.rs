//! The request/response envelope shared by every bus call, and the set of
//! recognized request kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The `type` discriminant carried on every request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "STATUS_UPDATE")]
    StatusUpdate,
    #[serde(rename = "MESSAGE_PUSH")]
    MessagePush,
    #[serde(rename = "MESSAGE_GET")]
    MessageGet,
    #[serde(rename = "MESSAGE_DEL")]
    MessageDel,
    #[serde(rename = "EVENT_GET")]
    EventGet,
    #[serde(rename = "EVENT_DEL")]
    EventDel,
    #[serde(rename = "LIFECYCLE_GET")]
    LifecycleGet,
    #[serde(rename = "LIFECYCLE_DEL")]
    LifecycleDel,
    #[serde(rename = "USER_CONTEXT_GET")]
    UserContextGet,
    #[serde(rename = "PLUGIN_TO_PLUGIN")]
    PluginToPlugin,
    #[serde(rename = "PLUGIN_QUERY")]
    PluginQuery,
    #[serde(rename = "PLUGIN_CONFIG_GET")]
    PluginConfigGet,
    #[serde(rename = "PLUGIN_CONFIG_UPDATE")]
    PluginConfigUpdate,
    #[serde(rename = "PLUGIN_SYSTEM_CONFIG_GET")]
    PluginSystemConfigGet,
    #[serde(rename = "MEMORY_QUERY")]
    MemoryQuery,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::MessagePush => "MESSAGE_PUSH",
            Self::MessageGet => "MESSAGE_GET",
            Self::MessageDel => "MESSAGE_DEL",
            Self::EventGet => "EVENT_GET",
            Self::EventDel => "EVENT_DEL",
            Self::LifecycleGet => "LIFECYCLE_GET",
            Self::LifecycleDel => "LIFECYCLE_DEL",
            Self::UserContextGet => "USER_CONTEXT_GET",
            Self::PluginToPlugin => "PLUGIN_TO_PLUGIN",
            Self::PluginQuery => "PLUGIN_QUERY",
            Self::PluginConfigGet => "PLUGIN_CONFIG_GET",
            Self::PluginConfigUpdate => "PLUGIN_CONFIG_UPDATE",
            Self::PluginSystemConfigGet => "PLUGIN_SYSTEM_CONFIG_GET",
            Self::MemoryQuery => "MEMORY_QUERY",
        }
    }

    /// Whether this request kind expects a correlated response at all.
    /// `STATUS_UPDATE` is fire-and-forget.
    pub fn expects_response(self) -> bool {
        !matches!(self, Self::StatusUpdate)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request envelope as placed on `plugin_comm_queue` or sent over the
/// low-latency transport. `data` carries whatever fields are specific to
/// `kind` (see the per-operation tables in the bus client modules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub from_plugin: String,
    pub request_id: String,
    pub timeout: f64,
    #[serde(flatten)]
    pub data: Value,
}

impl RequestEnvelope {
    /// Builds a new envelope with a fresh, unique `request_id`.
    pub fn new(kind: RequestKind, from_plugin: impl Into<String>, timeout: f64, data: Value) -> Self {
        Self {
            kind,
            from_plugin: from_plugin.into(),
            request_id: Uuid::new_v4().to_string(),
            timeout,
            data,
        }
    }
}

/// The outcome half of a response: either a success payload or an error
/// message. Exactly one of the two is ever present, mirroring the wire
/// contract `{request_id, result}` / `{request_id, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseOutcome {
    Result { result: Value },
    Error { error: String },
}

/// A response envelope as delivered via `response_queue` or the state
/// registry. Responses may arrive out of order relative to dispatch; the
/// only correlation guarantee is that `request_id` matches the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl ResponseEnvelope {
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ResponseOutcome::Result { result },
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: ResponseOutcome::Error {
                error: error.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error { .. })
    }

    /// Returns the success payload, wrapping a non-object result in
    /// `{"result": value}` the way scalar and array results are surfaced to
    /// callers.
    pub fn into_result(self) -> Result<Value, String> {
        match self.outcome {
            ResponseOutcome::Result { result } => Ok(result),
            ResponseOutcome::Error { error } => Err(error),
        }
    }
}
