//! # Plugin Bus Transport
//!
//! The dual transport: a reliable mpsc-backed queue path and a low-latency
//! length-framed TCP path, plus the push batcher and the state registry
//! contract the host must satisfy for request/response correlation.

pub mod backoff;
pub mod batcher;
pub mod client;
pub mod error;
pub mod framing;
pub mod queue;
pub mod registry;

pub use backoff::Backoff;
pub use batcher::{BatchSink, PushBatcher, MAX_CLOSE_FLUSH};
pub use client::LowLatencyClient;
pub use error::{TransportError, TransportResult};
pub use queue::{
    MessageQueue, MessageQueueReceiver, PluginCommQueue, PluginCommQueueReceiver, ResponseQueue,
    ResponseQueueSender,
};
pub use registry::{InMemoryStateRegistry, StateRegistry};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::batcher::{BatchSink, PushBatcher};
    pub use crate::client::LowLatencyClient;
    pub use crate::error::{TransportError, TransportResult};
    pub use crate::queue::{MessageQueue, PluginCommQueue, ResponseQueue};
    pub use crate::registry::{InMemoryStateRegistry, StateRegistry};
}
