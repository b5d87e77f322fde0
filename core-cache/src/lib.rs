//! Offline media cache
//!
//! Caches notification attachments and bucket icons on local disk with
//! observable metadata. The [`store::CacheStore`] holds every item's
//! disposition in memory for synchronous lookups and watchable projections;
//! the [`queue::DownloadQueue`] runs one prioritized download at a time and
//! always resolves with a flagged item rather than failing.

pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod repository;
pub mod store;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use models::{
    CacheItem, CacheKey, CacheSnapshot, CacheStats, DownloadRequest, MediaType, QueueEntry,
    QueueState,
};
pub use queue::{DownloadQueue, FORCE_DOWNLOAD_PRIORITY};
pub use repository::{CacheMetadataRepository, SqliteCacheMetadataRepository};
pub use store::CacheStore;
