//! # Plugin Bus Runtime
//!
//! Host-side pieces of the plugin bus: the router that drains the inbound
//! request queue and enforces the `plugin_id` routing rules, the event
//! ingress surface a thin HTTP front door would sit on top of,
//! configuration loading, and logging setup.

pub mod config;
pub mod ingress;
pub mod logging;
pub mod router;

pub use config::{ConfigError, ConfigLoader, ConfigResult, PluginBusConfig, load_config, load_config_from_file};
pub use ingress::{IngressEnvelope, IngressKind, IngressQueue};
pub use logging::{LoggingBuilder, LoggingGuard, SpanEvents};
pub use router::{BatchReorderSink, PluginRegistry, PushSink, RequestHandler, Router};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{ConfigLoader, PluginBusConfig};
    pub use crate::ingress::{IngressEnvelope, IngressKind, IngressQueue};
    pub use crate::logging::{LoggingBuilder, LoggingGuard};
    pub use crate::router::{PushSink, RequestHandler, Router};
}
