//! Media cache error types

use thiserror::Error;

/// Errors surfaced by the media cache.
///
/// The public scheduler API resolves with flagged [`crate::models::CacheItem`]s
/// instead of failing, so the only error callers of `download_media` ever see
/// is [`CacheError::Shutdown`]. The other variants flow through internal
/// plumbing and the persistence worker.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache has been shut down")]
    Shutdown,

    #[error("Storage error: {0}")]
    Storage(#[from] core_store::StoreError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
