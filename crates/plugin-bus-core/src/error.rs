//! Error taxonomy for the plugin bus.
//!
//! Mirrors the classification in the bus protocol design: transport
//! failures are recoverable via backoff, timeouts and remote errors always
//! surface to the caller, policy and usage errors are raised immediately
//! without any IPC.

use thiserror::Error;

/// Errors raised by bus clients, the plugin context, and the dual transport.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// IPC send/recv failure. Recoverable via backoff within the caller's deadline.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's deadline elapsed before a correlated response arrived.
    #[error("{request_kind} timed out after {timeout_secs:.3}s")]
    Timeout {
        /// The request kind that timed out (e.g. `MESSAGE_GET`).
        request_kind: String,
        /// The deadline that elapsed, in seconds.
        timeout_secs: f64,
    },

    /// The response envelope carried an `error` field.
    #[error("{0}")]
    Remote(String),

    /// A synchronous call was attempted inside handler scope under the `reject` policy.
    #[error(
        "sync call '{method}' invoked inside handler ({handler}). \
         This may block the command loop and cause deadlocks/timeouts."
    )]
    Policy {
        /// The method that was rejected.
        method: String,
        /// The handler context it was invoked from.
        handler: String,
    },

    /// An empty required id, an invalid argument, or a call made from the
    /// wrong execution context (e.g. a sync call from inside a running
    /// scheduler).
    #[error("{0}")]
    Usage(String),
}

impl BusError {
    /// Builds a [`BusError::Timeout`] for the given request kind and deadline.
    pub fn timeout(request_kind: impl Into<String>, timeout_secs: f64) -> Self {
        Self::Timeout {
            request_kind: request_kind.into(),
            timeout_secs,
        }
    }

    /// Builds a [`BusError::Policy`] for the given method/handler pair.
    pub fn policy(method: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::Policy {
            method: method.into(),
            handler: handler.into(),
        }
    }

    /// Builds a [`BusError::Usage`] error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// True for errors that are safe to retry with backoff (transport-level only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type used throughout the plugin bus.
pub type BusResult<T> = Result<T, BusError>;
