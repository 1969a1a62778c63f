//! # Plugin Bus
//!
//! A communication fabric for host-mediated plugin workers: bus clients for
//! memory, messages, events and lifecycle records, a dual (reliable +
//! low-latency) transport, a per-plugin persistent KV store, and the
//! host-side router and event ingress surface that tie them together.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐    send_request_and_wait    ┌──────────────┐
//! │ PluginContext  │ ───────────────────────────▶ │    Router    │
//! │ (plugin side)  │ ◀─────────────────────────── │ (host side)  │
//! └────────────────┘        response_queue        └──────────────┘
//!         │                                               │
//!         ▼                                               ▼
//! bus.memory / bus.messages                      RequestHandler impl
//! bus.events / bus.lifecycle                      (business logic)
//! ```
//!
//! - [`plugin_bus_framework::PluginContext`]: the plugin-side entry point.
//! - [`plugin_bus_runtime::Router`]: the host-side request dispatcher.
//! - [`plugin_bus_store::KvStore`]: a per-plugin persistent key-value store.
//!
//! ## Quick start (plugin side)
//!
//! ```rust,ignore
//! use plugin_bus::prelude::*;
//!
//! async fn on_message(context: Arc<PluginContext>) -> BusResult<()> {
//!     let messages = MessagesClient::new(context.clone())
//!         .get(None, 50, None, Duration::from_secs(5))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub use plugin_bus_core as core;
pub use plugin_bus_framework as framework;
pub use plugin_bus_runtime as runtime;
pub use plugin_bus_store as store;
pub use plugin_bus_transport as transport;

pub use plugin_bus_core::*;
pub use plugin_bus_framework::{
    BusHub, EventsClient, LifecycleClient, MemoryClient, MessageType, MessagesClient,
    PluginContext, PluginContextConfig, PolicyCache, PushMessage, SyncCallPolicy,
    current_handler, run_in_handler_scope,
};
pub use plugin_bus_runtime::{
    BatchReorderSink, ConfigLoader, IngressEnvelope, IngressKind, IngressQueue, LoggingBuilder,
    PluginBusConfig, PluginRegistry, PushSink, RequestHandler, Router,
};
pub use plugin_bus_store::KvStore;
pub use plugin_bus_transport::{
    InMemoryStateRegistry, LowLatencyClient, MessageQueue, PluginCommQueue, ResponseQueue,
    StateRegistry,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use plugin_bus_core::prelude::*;
    pub use plugin_bus_framework::prelude::*;
    pub use plugin_bus_runtime::prelude::*;
    pub use plugin_bus_store::KvStore;
    pub use plugin_bus_transport::prelude::*;
}
