//! Media cache data models
//!
//! A cache entry is identified by the pair (url, media type): the same URL
//! can legitimately appear as both an inline image and a bucket icon, and
//! the two copies live and die independently.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Media categories the cache distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Gif,
    Audio,
    Icon,
}

impl MediaType {
    /// All media types, in a stable order.
    pub const ALL: [MediaType; 5] = [
        MediaType::Image,
        MediaType::Video,
        MediaType::Gif,
        MediaType::Audio,
        MediaType::Icon,
    ];

    /// Stable string form, used as the storage key component.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Gif => "gif",
            MediaType::Audio => "audio",
            MediaType::Icon => "icon",
        }
    }

    /// Parse a label coming from remote attachment metadata.
    ///
    /// Labels arrive in whatever casing the backend uses, so matching is
    /// case-insensitive. Unknown labels map to `None` and the attachment is
    /// simply not cached.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            "gif" => Some(MediaType::Gif),
            "audio" => Some(MediaType::Audio),
            "icon" => Some(MediaType::Icon),
            _ => None,
        }
    }

    /// File extension for locally stored copies.
    pub fn file_extension(&self) -> &'static str {
        match self {
            MediaType::Image => "jpg",
            MediaType::Video => "mp4",
            MediaType::Gif => "gif",
            MediaType::Audio => "m4a",
            MediaType::Icon => "png",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub url: String,
    pub media_type: MediaType,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            media_type,
        }
    }

    /// Content-addressed file name for the local copy.
    ///
    /// The name is derived from the URL hash so re-downloads land on the
    /// same file and a URL never leaks into the filesystem.
    pub fn cache_file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}.{}", &digest[..32], self.media_type.file_extension())
    }
}

/// Full disposition of one cached media item.
///
/// An item exists from the first download request onward, whatever the
/// outcome: flags record downloading, failure and user deletion rather than
/// removing the row, so lookups can always answer synchronously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub key: CacheKey,
    /// Absolute path of the local copy, present only once fully written.
    pub local_path: Option<String>,
    pub size_bytes: u64,
    pub is_downloading: bool,
    pub is_permanent_failure: bool,
    pub is_user_deleted: bool,
    pub downloaded_at: Option<i64>,
    /// Timestamp of the notification the media belongs to, for recency sort.
    pub notification_date: Option<i64>,
    pub last_error: Option<String>,
}

impl CacheItem {
    /// A fresh, never-downloaded entry.
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            local_path: None,
            size_bytes: 0,
            is_downloading: false,
            is_permanent_failure: false,
            is_user_deleted: false,
            downloaded_at: None,
            notification_date: None,
            last_error: None,
        }
    }

    /// True when a local copy exists and the user has not deleted it.
    pub fn is_cached(&self) -> bool {
        self.local_path.is_some() && !self.is_user_deleted && !self.is_downloading
    }

    /// Transition into the downloading state. A forced download clears the
    /// previous failure and deletion flags so the item gets a clean run.
    pub fn mark_downloading(&mut self, force: bool) {
        self.is_downloading = true;
        if force {
            self.is_permanent_failure = false;
            self.is_user_deleted = false;
            self.last_error = None;
        }
    }

    /// Record a completed download.
    pub fn mark_cached(
        &mut self,
        local_path: PathBuf,
        size_bytes: u64,
        downloaded_at: i64,
        notification_date: Option<i64>,
    ) {
        self.local_path = Some(local_path.to_string_lossy().into_owned());
        self.size_bytes = size_bytes;
        self.is_downloading = false;
        self.is_permanent_failure = false;
        self.is_user_deleted = false;
        self.downloaded_at = Some(downloaded_at);
        if notification_date.is_some() {
            self.notification_date = notification_date;
        }
        self.last_error = None;
    }

    /// Record a failed download.
    pub fn mark_failed(&mut self, message: impl Into<String>, permanent: bool) {
        self.is_downloading = false;
        self.is_permanent_failure = permanent;
        self.last_error = Some(message.into());
    }

    /// Record a user deletion. The row is kept so the item stays visible as
    /// deleted instead of silently re-downloading.
    pub fn mark_user_deleted(&mut self) {
        self.is_user_deleted = true;
        self.is_downloading = false;
        self.local_path = None;
        self.size_bytes = 0;
    }
}

/// Aggregate cache statistics.
///
/// User-deleted items are excluded from every figure here even though their
/// rows survive in the metadata map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: usize,
    pub total_bytes: u64,
    pub downloading_items: usize,
    pub failed_items: usize,
    pub items_by_type: BTreeMap<MediaType, usize>,
    pub calculated_at: i64,
}

impl CacheStats {
    /// Average size of a fully cached item, zero when nothing is cached.
    pub fn average_item_size(&self) -> u64 {
        if self.total_items == 0 {
            0
        } else {
            self.total_bytes / self.total_items as u64
        }
    }
}

/// Point-in-time view of the whole cache: aggregate stats plus every
/// non-deleted item, taken under a single lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub stats: CacheStats,
    pub items: Vec<CacheItem>,
}

/// One download request as handed to the scheduler.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub media_type: MediaType,
    pub priority: i32,
    pub notification_date: Option<i64>,
    pub force: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            media_type,
            priority: 0,
            notification_date: None,
            force: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notification_date(mut self, notification_date: i64) -> Self {
        self.notification_date = Some(notification_date);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.url.clone(), self.media_type)
    }
}

/// One pending entry as exposed through the queue state stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: CacheKey,
    pub priority: i32,
}

/// Observable snapshot of the download queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    /// Pending entries in execution order (highest priority first).
    pub queue: Vec<QueueEntry>,
    pub is_processing: bool,
    pub current_item: Option<CacheKey>,
    /// Completions since the scheduler was created, never reset.
    pub completed_count: u64,
    /// Failures since the scheduler was created, never reset.
    pub failed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_label_parsing_is_case_insensitive() {
        assert_eq!(MediaType::from_label("IMAGE"), Some(MediaType::Image));
        assert_eq!(MediaType::from_label("Gif"), Some(MediaType::Gif));
        assert_eq!(MediaType::from_label("pdf"), None);
    }

    #[test]
    fn cache_file_name_is_stable_and_typed() {
        let a = CacheKey::new("https://example.com/a.jpg", MediaType::Image);
        let b = CacheKey::new("https://example.com/a.jpg", MediaType::Image);
        assert_eq!(a.cache_file_name(), b.cache_file_name());
        assert!(a.cache_file_name().ends_with(".jpg"));

        let icon = CacheKey::new("https://example.com/a.jpg", MediaType::Icon);
        assert_ne!(a.cache_file_name(), icon.cache_file_name());
    }

    #[test]
    fn forced_download_clears_failure_flags() {
        let mut item = CacheItem::new(CacheKey::new("u", MediaType::Image));
        item.mark_failed("410 Gone", true);
        assert!(item.is_permanent_failure);

        item.mark_downloading(true);
        assert!(item.is_downloading);
        assert!(!item.is_permanent_failure);
        assert!(item.last_error.is_none());
    }

    #[test]
    fn user_deleted_item_is_not_cached() {
        let mut item = CacheItem::new(CacheKey::new("u", MediaType::Image));
        item.mark_cached(PathBuf::from("/tmp/x.jpg"), 10, 1, None);
        assert!(item.is_cached());

        item.mark_user_deleted();
        assert!(!item.is_cached());
        assert!(item.local_path.is_none());
        assert_eq!(item.size_bytes, 0);
    }

    #[test]
    fn average_item_size_handles_empty_cache() {
        let stats = CacheStats::default();
        assert_eq!(stats.average_item_size(), 0);
    }
}
