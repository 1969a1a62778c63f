//! Configuration schema for the plugin bus host process.
//!
//! Every field carries a `#[serde(default)]` so a plugin or host can ship a
//! partial (or absent) config file and still get sane behavior; see
//! [`super::loader::ConfigLoader`] for how these defaults get layered with
//! environment overrides.

use plugin_bus_framework::SyncCallPolicy;
use serde::{Deserialize, Serialize};

fn default_sync_call_in_handler() -> SyncCallPolicy {
    SyncCallPolicy::Warn
}

fn default_batch_size() -> usize {
    32
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_sync_timeout_seconds() -> f64 {
    30.0
}

fn default_endpoint() -> String {
    "127.0.0.1:8901".to_string()
}

fn default_ingress_capacity() -> usize {
    1000
}

fn default_store_enabled() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

/// Top-level configuration for a plugin bus host. Loaded through
/// [`super::loader::ConfigLoader`], which layers a TOML file under
/// environment variables prefixed `PLUGIN_BUS_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginBusConfig {
    pub safety: SafetyConfig,
    pub fast_push: FastPushConfig,
    pub ingress: IngressConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub log_toggles: LogToggles,
}

impl Default for PluginBusConfig {
    fn default() -> Self {
        Self {
            safety: SafetyConfig::default(),
            fast_push: FastPushConfig::default(),
            ingress: IngressConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            log_toggles: LogToggles::default(),
        }
    }
}

/// Handler-scope safety policy. See `spec.md` §6.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    #[serde(default = "default_sync_call_in_handler")]
    pub sync_call_in_handler: SyncCallPolicy,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            sync_call_in_handler: default_sync_call_in_handler(),
        }
    }
}

/// Fast-path (low-latency transport + batcher) tuning. See `spec.md` §6.3/§6.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastPushConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_sync_timeout_seconds")]
    pub sync_timeout_seconds: f64,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for FastPushConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            sync_timeout_seconds: default_sync_timeout_seconds(),
            endpoint: default_endpoint(),
        }
    }
}

/// Event ingress queue sizing. See `spec.md` §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    #[serde(default = "default_ingress_capacity")]
    pub capacity: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            capacity: default_ingress_capacity(),
        }
    }
}

/// Per-plugin KV store toggle. See `spec.md` §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_store_enabled(),
        }
    }
}

/// Output format for the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging setup, consumed by [`crate::logging::LoggingBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// When set, logs are additionally written to a rotating file under this
    /// directory via `tracing-appender`.
    #[serde(default)]
    pub file_directory: Option<String>,
    #[serde(default = "default_true")]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file_directory: None,
            with_target: true,
        }
    }
}

/// Fine-grained log toggles carried over from `plugin/settings.py`'s
/// `PLUGIN_LOG_*` module constants (see `SPEC_FULL.md` §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogToggles {
    #[serde(default = "default_false")]
    pub ctx_message_push: bool,
    #[serde(default = "default_true")]
    pub ctx_status_update: bool,
    #[serde(default = "default_true")]
    pub sync_call_warnings: bool,
}

impl Default for LogToggles {
    fn default() -> Self {
        Self {
            ctx_message_push: default_false(),
            ctx_status_update: default_true(),
            sync_call_warnings: default_true(),
        }
    }
}
