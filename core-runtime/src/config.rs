//! # Core Configuration
//!
//! Dependency-injection root for the notification platform core.
//!
//! The host application constructs a [`CoreConfig`] once at startup and hands
//! it to the core services. Every platform capability crosses this boundary as
//! a trait object; nothing in the core reaches for a process-wide singleton.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/notifications.db")
//!     .cache_dir("/cache/media")
//!     .remote_source(my_api_client)
//!     .sync_bridge(my_cloudkit_bridge)
//!     .build()?;
//! ```
//!
//! On desktop builds with the `desktop-shims` feature enabled, the HTTP client
//! and file system default to the reqwest/tokio implementations from
//! `bridge-desktop`; other platforms must inject their own.

use crate::error::{Error, Result};
use bridge_traits::{CloudKitBridge, FileSystemAccess, HttpClient, RemoteDataSource};
use std::path::PathBuf;
use std::sync::Arc;

/// Core configuration for the notification platform core.
///
/// This struct holds all dependencies and settings required to initialize
/// the core library. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Directory for storing cached media attachments
    pub cache_dir: PathBuf,

    /// Maximum cache size in megabytes
    pub cache_size_mb: usize,

    /// HTTP client for media downloads (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// File system access abstraction (optional with desktop default)
    pub file_system: Option<Arc<dyn FileSystemAccess>>,

    /// Backend query/mutation surface (required)
    pub remote_source: Arc<dyn RemoteDataSource>,

    /// Platform sync bridge (required)
    pub sync_bridge: Arc<dyn CloudKitBridge>,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_mb", &self.cache_size_mb)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field(
                "file_system",
                &self
                    .file_system
                    .as_ref()
                    .map(|_| "FileSystemAccess { ... }"),
            )
            .field("remote_source", &"RemoteDataSource { ... }")
            .field("sync_bridge", &"CloudKitBridge { ... }")
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Enable the media attachment cache and download queue
    pub enable_media_cache: bool,
    /// Enable event-driven incremental sync triggering
    pub enable_auto_sync: bool,
    /// Enable the database corruption recovery service
    pub enable_recovery: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_media_cache: true,
            enable_auto_sync: true,
            enable_recovery: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Cache directory is not empty
    /// - Cache size is reasonable (> 0 and < 100GB)
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.cache_size_mb == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 MB".to_string(),
            ));
        }

        if self.cache_size_mb > 100_000 {
            return Err(Error::Config(
                "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for media downloads. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Mobile: inject a platform-native HTTP client."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for cached media and backups. \
                 Desktop: enable the 'desktop-shims' feature to use the default TokioFileSystem. \
                 Mobile: inject sandboxed app-directory file access."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
/// The builder validates required dependencies and provides helpful error
/// messages.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    cache_size_mb: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    remote_source: Option<Arc<dyn RemoteDataSource>>,
    sync_bridge: Option<Arc<dyn CloudKitBridge>>,
    features: Option<FeatureFlags>,
}

impl CoreConfigBuilder {
    /// Set the SQLite database file path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set the media cache directory (required).
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Set the maximum cache size in megabytes (default: 1024).
    pub fn cache_size_mb(mut self, size_mb: usize) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    /// Inject an HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Inject a file system implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Inject the backend data source (required).
    pub fn remote_source(mut self, remote: Arc<dyn RemoteDataSource>) -> Self {
        self.remote_source = Some(remote);
        self
    }

    /// Inject the platform sync bridge (required).
    pub fn sync_bridge(mut self, bridge: Arc<dyn CloudKitBridge>) -> Self {
        self.sync_bridge = Some(bridge);
        self
    }

    /// Set all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = Some(features);
        self
    }

    /// Build the final configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a required dependency is missing or the resulting
    /// configuration fails validation.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self
            .database_path
            .ok_or_else(|| Error::Config("database_path is required".to_string()))?;

        let cache_dir = self
            .cache_dir
            .ok_or_else(|| Error::Config("cache_dir is required".to_string()))?;

        let remote_source = self.remote_source.ok_or_else(|| Error::CapabilityMissing {
            capability: "RemoteDataSource".to_string(),
            message: "Inject the backend API client via remote_source()".to_string(),
        })?;

        let sync_bridge = self.sync_bridge.ok_or_else(|| Error::CapabilityMissing {
            capability: "CloudKitBridge".to_string(),
            message: "Inject the platform sync bridge via sync_bridge()".to_string(),
        })?;

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None => Some(provide_default_http_client()?),
        };

        let file_system = match self.file_system {
            Some(fs) => Some(fs),
            None => Some(provide_default_file_system()?),
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            cache_size_mb: self.cache_size_mb.unwrap_or(1024),
            http_client,
            file_system,
            remote_source,
            sync_bridge,
            features: self.features.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        CloudKitEvent, FetchAllResult, FileMetadata, HttpRequest, HttpResponse,
        IncrementalSyncResult, RemoteBucket, RemoteNotification,
    };
    use bytes::Bytes;
    use std::path::Path;
    use tokio::sync::broadcast;

    struct StubRemote;

    #[async_trait]
    impl RemoteDataSource for StubRemote {
        async fn fetch_notifications(&self) -> bridge_traits::Result<Vec<RemoteNotification>> {
            Ok(Vec::new())
        }

        async fn fetch_buckets(&self) -> bridge_traits::Result<Vec<RemoteBucket>> {
            Ok(Vec::new())
        }

        async fn report_received_up_to(&self, _notification_id: &str) -> bridge_traits::Result<()> {
            Ok(())
        }
    }

    struct StubBridge {
        sender: broadcast::Sender<CloudKitEvent>,
    }

    impl StubBridge {
        fn new() -> Self {
            let (sender, _) = broadcast::channel(8);
            Self { sender }
        }
    }

    #[async_trait]
    impl CloudKitBridge for StubBridge {
        fn subscribe(&self) -> broadcast::Receiver<CloudKitEvent> {
            self.sender.subscribe()
        }

        async fn sync_incremental(
            &self,
            _full_resync: bool,
        ) -> bridge_traits::Result<IncrementalSyncResult> {
            Ok(IncrementalSyncResult {
                success: true,
                updated_count: 0,
            })
        }

        async fn fetch_all_notifications(&self) -> bridge_traits::Result<FetchAllResult> {
            Ok(FetchAllResult {
                success: true,
                notifications: Vec::new(),
            })
        }
    }

    struct StubFs;

    #[async_trait]
    impl FileSystemAccess for StubFs {
        async fn get_cache_directory(&self) -> bridge_traits::Result<PathBuf> {
            Ok(PathBuf::from("/tmp/cache"))
        }
        async fn get_data_directory(&self) -> bridge_traits::Result<PathBuf> {
            Ok(PathBuf::from("/tmp/data"))
        }
        async fn exists(&self, _path: &Path) -> bridge_traits::Result<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> bridge_traits::Result<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: false,
            })
        }
        async fn create_dir_all(&self, _path: &Path) -> bridge_traits::Result<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> bridge_traits::Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> bridge_traits::Result<()> {
            Ok(())
        }
        async fn copy_file(&self, _from: &Path, _to: &Path) -> bridge_traits::Result<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> bridge_traits::Result<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> bridge_traits::Result<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> bridge_traits::Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct StubHttp;

    #[async_trait]
    impl HttpClient for StubHttp {
        async fn execute(&self, _request: HttpRequest) -> bridge_traits::Result<HttpResponse> {
            Ok(HttpResponse {
                status: 200,
                headers: Default::default(),
                body: Bytes::new(),
            })
        }

        async fn download_stream(
            &self,
            _url: String,
        ) -> bridge_traits::Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(std::io::Cursor::new(Vec::new())))
        }
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .remote_source(Arc::new(StubRemote))
            .sync_bridge(Arc::new(StubBridge::new()))
            .http_client(Arc::new(StubHttp))
            .file_system(Arc::new(StubFs))
    }

    #[test]
    fn test_build_with_all_dependencies() {
        let config = builder_with_bridges()
            .database_path("/data/notifications.db")
            .cache_dir("/cache/media")
            .build()
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/data/notifications.db"));
        assert_eq!(config.cache_size_mb, 1024);
        assert!(config.features.enable_media_cache);
    }

    #[test]
    fn test_missing_database_path_rejected() {
        let result = builder_with_bridges().cache_dir("/cache/media").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_remote_source_rejected() {
        let result = CoreConfig::builder()
            .database_path("/data/notifications.db")
            .cache_dir("/cache/media")
            .sync_bridge(Arc::new(StubBridge::new()))
            .http_client(Arc::new(StubHttp))
            .file_system(Arc::new(StubFs))
            .build();

        assert!(matches!(result, Err(Error::CapabilityMissing { .. })));
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let result = builder_with_bridges()
            .database_path("/data/notifications.db")
            .cache_dir("/cache/media")
            .cache_size_mb(0)
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_oversized_cache_rejected() {
        let result = builder_with_bridges()
            .database_path("/data/notifications.db")
            .cache_dir("/cache/media")
            .cache_size_mb(200_000)
            .build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_feature_flags_override() {
        let config = builder_with_bridges()
            .database_path("/data/notifications.db")
            .cache_dir("/cache/media")
            .features(FeatureFlags {
                enable_media_cache: false,
                enable_auto_sync: true,
                enable_recovery: false,
            })
            .build()
            .unwrap();

        assert!(!config.features.enable_media_cache);
        assert!(!config.features.enable_recovery);
    }
}
