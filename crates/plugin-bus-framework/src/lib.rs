//! # Plugin Bus Framework
//!
//! The plugin-side API: [`PluginContext`], the handler-scope safety policy
//! that guards synchronous calls made from inside event handlers, and the
//! typed bus clients built on top of the context's request/response
//! round trip.

pub mod clients;
pub mod context;
pub mod handler_scope;
pub mod policy;

pub use context::{MessageType, PluginContext, PluginContextConfig, PushMessage};
pub use handler_scope::{current_handler, run_in_handler_scope};
pub use policy::{PolicyCache, SyncCallPolicy};

pub use clients::{BusHub, EventsClient, LifecycleClient, MemoryClient, MessagesClient};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::clients::{BusHub, EventsClient, LifecycleClient, MemoryClient, MessagesClient};
    pub use crate::context::{MessageType, PluginContext, PluginContextConfig, PushMessage};
    pub use crate::handler_scope::{current_handler, run_in_handler_scope};
    pub use crate::policy::{PolicyCache, SyncCallPolicy};
    pub use plugin_bus_core::prelude::*;
}
