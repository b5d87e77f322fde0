//! Media cache configuration

use crate::error::{CacheError, Result};
use std::time::Duration;

/// Configuration for the media cache and its download scheduler.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory name under the platform cache root where media lands.
    pub cache_directory: String,
    /// Per-attempt download timeout.
    pub download_timeout: Duration,
    /// Attempts per download request before the request gives up. The
    /// failure stays transient; a later request tries again.
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: "media_cache".to_string(),
            download_timeout: Duration::from_secs(60),
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_directory(mut self, dir: impl Into<String>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_directory.is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache directory cannot be empty".to_string(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "download timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(CacheError::InvalidConfig(
                "max retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
