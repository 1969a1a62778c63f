//! Wire-level error taxonomy for the dual transport.

use thiserror::Error;

/// Errors raised by the reliable queue path and the low-latency datagram
/// client. These are folded into [`plugin_bus_core::BusError::Transport`] or
/// [`plugin_bus_core::BusError::Timeout`] by the plugin context.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("connection to {endpoint} closed")]
    Closed { endpoint: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request timed out after {0:.3}s")]
    Timeout(f64),

    #[error("queue is full")]
    QueueFull,

    #[error("queue is closed")]
    QueueClosed,
}

pub type TransportResult<T> = Result<T, TransportError>;
