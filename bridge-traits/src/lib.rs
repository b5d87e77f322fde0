//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the notification core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform
//! (desktop, iOS, Android, web, watch).
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations for media downloads
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for cached attachments
//!
//! ### Backend
//! - [`RemoteDataSource`](remote::RemoteDataSource) - Authoritative notification/bucket
//!   fetches and the best-effort receipt report
//!
//! ### Platform Sync
//! - [`CloudKitBridge`](cloudkit::CloudKitBridge) - Record-change events, incremental
//!   sync, and full notification re-hydration from the platform sync store
//!
//! ## Fail-Fast Strategy
//!
//! The core should fail fast with descriptive errors when a required capability
//! is missing rather than degrading silently.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! with actionable messages and context (file paths, HTTP status, record ids).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent
//! usage across async tasks.

pub mod cloudkit;
pub mod error;
pub mod http;
pub mod remote;
pub mod storage;

pub use error::{BridgeError, Result};

// Re-export commonly used types
pub use cloudkit::{
    CloudKitBridge, CloudKitEvent, FetchAllResult, IncrementalSyncResult, RecordChangeEvent,
    SyncProgressEvent,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use remote::{RemoteAttachment, RemoteBucket, RemoteDataSource, RemoteNotification};
pub use storage::{FileMetadata, FileSystemAccess};
