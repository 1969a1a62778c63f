//! Error taxonomy for the persistent key-value store.

use thiserror::Error;

/// Errors raised by [`crate::KvStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] sled::Error),

    #[error("failed to encode value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
