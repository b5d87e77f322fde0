//! # Repository Pattern Implementation
//!
//! This module provides repository traits and implementations for data access.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//! - Implementations hold an `Arc<DurableDatabase>` and fetch the current
//!   pool per operation, so they keep working across a recovery reset
//!
//! ## Available Repositories
//!
//! - `NotificationRepository` - Notification rows and per-bucket aggregates
//! - `BucketRepository` - Bucket rows mirrored from the backend
//! - `SyncStateRepository` - Opaque sync bookkeeping (receipt markers etc.)

pub mod bucket;
pub mod notification;
pub mod sync_state;

pub use bucket::{BucketRepository, SqliteBucketRepository};
pub use notification::{NotificationRepository, SqliteNotificationRepository};
pub use sync_state::{SqliteSyncStateRepository, SyncStateRepository, LAST_RECEIVED_NOTIFICATION_KEY};
