//! Configuration loading and validation for the plugin bus host.
//!
//! A TOML file (discovered via [`ConfigLoader`]'s search paths) provides the
//! base layer; environment variables prefixed `PLUGIN_BUS_` override it
//! field by field, courtesy of `figment`.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config, load_config_from_file};
pub use schema::{
    FastPushConfig, IngressConfig, LogFormat, LogToggles, LoggingConfig, PluginBusConfig,
    SafetyConfig, StoreConfig,
};
pub use validation::validate_config;
