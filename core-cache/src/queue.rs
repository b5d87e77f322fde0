//! Priority download scheduler
//!
//! One download runs at a time. Pending requests are ordered by priority
//! (highest first) with FIFO tie-breaking, and a repeated request for a URL
//! already pending merges into the existing entry instead of queueing twice.
//!
//! The scheduler resolves, it does not reject: every code path hands the
//! caller a [`CacheItem`] whose flags describe the outcome. The only error a
//! caller can see is [`CacheError::Shutdown`].

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::models::{CacheItem, CacheKey, DownloadRequest, MediaType, QueueEntry, QueueState};
use crate::store::CacheStore;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Priority used by [`DownloadQueue::force_media_download`], above anything
/// batch prefetch uses.
pub const FORCE_DOWNLOAD_PRIORITY: i32 = 10;

struct PendingEntry {
    key: CacheKey,
    priority: i32,
    notification_date: Option<i64>,
    force: bool,
    seq: u64,
    waiters: Vec<oneshot::Sender<CacheItem>>,
}

struct CurrentEntry {
    key: CacheKey,
    waiters: Vec<oneshot::Sender<CacheItem>>,
    /// Set when the caller removed the in-flight item; the current attempt
    /// cannot be aborted, but no further retries run and the outcome is not
    /// re-queued.
    discard: bool,
}

struct QueueInner {
    pending: Vec<PendingEntry>,
    current: Option<CurrentEntry>,
    worker_running: bool,
    next_seq: u64,
    completed_count: u64,
    failed_count: u64,
    /// Completions in the current burst; resets when the queue drains so
    /// progress starts from zero on the next burst.
    run_completed: u64,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            current: None,
            worker_running: false,
            next_seq: 0,
            completed_count: 0,
            failed_count: 0,
            run_completed: 0,
        }
    }

    fn state(&self) -> QueueState {
        let mut ordered: Vec<&PendingEntry> = self.pending.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        QueueState {
            queue: ordered
                .into_iter()
                .map(|e| QueueEntry {
                    key: e.key.clone(),
                    priority: e.priority,
                })
                .collect(),
            is_processing: self.current.is_some(),
            current_item: self.current.as_ref().map(|c| c.key.clone()),
            completed_count: self.completed_count,
            failed_count: self.failed_count,
        }
    }

    /// Percentage of the current burst that has finished. 100 when idle.
    fn progress(&self) -> u8 {
        let remaining = self.pending.len() as u64 + u64::from(self.current.is_some());
        if remaining == 0 {
            100
        } else {
            ((self.run_completed * 100) / (self.run_completed + remaining)) as u8
        }
    }

    /// Index of the next entry to execute: highest priority, oldest first.
    fn next_index(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))
            .map(|(i, _)| i)
    }
}

/// Serial media download scheduler.
pub struct DownloadQueue {
    config: CacheConfig,
    store: Arc<CacheStore>,
    http_client: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    event_bus: Arc<EventBus>,
    inner: StdMutex<QueueInner>,
    progress_tx: watch::Sender<u8>,
    state_tx: watch::Sender<QueueState>,
    base_path: StdMutex<Option<PathBuf>>,
    shut_down: AtomicBool,
}

impl DownloadQueue {
    pub fn new(
        config: CacheConfig,
        store: Arc<CacheStore>,
        http_client: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(100);
        let (state_tx, _) = watch::channel(QueueState::default());
        Self {
            config,
            store,
            http_client,
            fs,
            event_bus,
            inner: StdMutex::new(QueueInner::new()),
            progress_tx,
            state_tx,
            base_path: StdMutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Validate the configuration and create the media directory.
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;
        let root = self
            .fs
            .get_cache_directory()
            .await?
            .join(&self.config.cache_directory);
        self.fs.create_dir_all(&root).await?;
        info!(path = %root.display(), "Media cache directory ready");
        *self.base_path.lock().expect("download queue lock poisoned") = Some(root);
        Ok(())
    }

    /// Request a download and wait for its outcome.
    ///
    /// Already-cached, permanently failed, and user-deleted items resolve
    /// immediately with their current disposition unless `force` is set.
    /// Failures resolve with the flags on the returned item; the only `Err`
    /// is [`CacheError::Shutdown`].
    pub async fn download_media(self: &Arc<Self>, request: DownloadRequest) -> Result<CacheItem> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CacheError::Shutdown);
        }

        let key = request.key();
        if !request.force {
            if let Some(item) = self.store.get_item_sync(&key.url, key.media_type) {
                if item.is_cached() || item.is_permanent_failure || item.is_user_deleted {
                    return Ok(item);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let spawn_worker = {
            let mut inner = self.inner.lock().expect("download queue lock poisoned");

            if let Some(current) = inner.current.as_mut().filter(|c| c.key == key) {
                // Already in flight; attach to the running download.
                current.waiters.push(tx);
            } else if let Some(entry) = inner.pending.iter_mut().find(|e| e.key == key) {
                // Merge: highest priority wins, force is sticky, the queue
                // position stays FIFO by the original arrival.
                entry.priority = entry.priority.max(request.priority);
                entry.force |= request.force;
                if entry.notification_date.is_none() {
                    entry.notification_date = request.notification_date;
                }
                entry.waiters.push(tx);
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.pending.push(PendingEntry {
                    key: key.clone(),
                    priority: request.priority,
                    notification_date: request.notification_date,
                    force: request.force,
                    seq,
                    waiters: vec![tx],
                });
            }

            self.publish_locked(&inner);
            if inner.worker_running {
                false
            } else {
                inner.worker_running = true;
                true
            }
        };

        if spawn_worker {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.run_worker().await });
        }

        match rx.await {
            Ok(item) => Ok(item),
            // Waiter dropped by removal or clear: resolve with whatever the
            // store currently says.
            Err(_) => Ok(self
                .store
                .get_item_sync(&key.url, key.media_type)
                .unwrap_or_else(|| CacheItem::new(key))),
        }
    }

    /// Re-download regardless of the item's current disposition.
    pub async fn force_media_download(
        self: &Arc<Self>,
        url: &str,
        media_type: MediaType,
        notification_date: Option<i64>,
    ) -> Result<CacheItem> {
        let mut request = DownloadRequest::new(url, media_type)
            .with_priority(FORCE_DOWNLOAD_PRIORITY)
            .with_force(true);
        request.notification_date = notification_date;
        self.download_media(request).await
    }

    /// Enqueue several requests at one priority, preserving input order as
    /// the FIFO tie-break, and wait for all of them.
    pub async fn batch_download(
        self: &Arc<Self>,
        requests: Vec<DownloadRequest>,
    ) -> Result<Vec<CacheItem>> {
        let futures: Vec<_> = requests
            .into_iter()
            .map(|request| self.download_media(request))
            .collect();
        futures::future::join_all(futures)
            .await
            .into_iter()
            .collect()
    }

    /// Remove a pending item, or flag the in-flight one so its outcome is
    /// discarded. Returns whether anything matched.
    pub fn remove_from_queue(&self, url: &str, media_type: MediaType) -> bool {
        let key = CacheKey::new(url, media_type);
        let removed = {
            let mut inner = self.inner.lock().expect("download queue lock poisoned");
            if let Some(pos) = inner.pending.iter().position(|e| e.key == key) {
                let entry = inner.pending.remove(pos);
                self.publish_locked(&inner);
                Some(entry.waiters)
            } else if let Some(current) = inner.current.as_mut().filter(|c| c.key == key) {
                current.discard = true;
                Some(Vec::new())
            } else {
                None
            }
        };

        match removed {
            Some(waiters) => {
                self.resolve_with_store_state(&key, waiters);
                true
            }
            None => false,
        }
    }

    /// Drop every pending request. The in-flight download, if any, runs out
    /// its current attempt but is flagged as discarded.
    pub fn clear_download_queue(&self) {
        let drained = {
            let mut inner = self.inner.lock().expect("download queue lock poisoned");
            let drained: Vec<PendingEntry> = inner.pending.drain(..).collect();
            if let Some(current) = inner.current.as_mut() {
                current.discard = true;
            }
            self.publish_locked(&inner);
            drained
        };

        for entry in drained {
            self.resolve_with_store_state(&entry.key, entry.waiters);
        }
        debug!("Download queue cleared");
    }

    pub fn is_in_queue(&self, url: &str, media_type: MediaType) -> bool {
        let key = CacheKey::new(url, media_type);
        let inner = self.inner.lock().expect("download queue lock poisoned");
        inner.pending.iter().any(|e| e.key == key)
            || inner.current.as_ref().is_some_and(|c| c.key == key)
    }

    pub fn queue_state(&self) -> QueueState {
        self.inner
            .lock()
            .expect("download queue lock poisoned")
            .state()
    }

    /// Watch the queue snapshot. Replays the current state on subscribe.
    pub fn watch_queue_state(&self) -> watch::Receiver<QueueState> {
        self.state_tx.subscribe()
    }

    /// Watch burst progress as a percentage; 100 whenever the queue is idle.
    pub fn watch_progress(&self) -> watch::Receiver<u8> {
        self.progress_tx.subscribe()
    }

    /// Refuse new requests and drop pending ones. An in-flight download
    /// finishes on its own.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.clear_download_queue();
    }

    fn publish_locked(&self, inner: &QueueInner) {
        self.state_tx.send_replace(inner.state());
        self.progress_tx.send_replace(inner.progress());
    }

    fn resolve_with_store_state(&self, key: &CacheKey, waiters: Vec<oneshot::Sender<CacheItem>>) {
        let item = self
            .store
            .get_item_sync(&key.url, key.media_type)
            .unwrap_or_else(|| CacheItem::new(key.clone()));
        for waiter in waiters {
            waiter.send(item.clone()).ok();
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let next = {
                let mut inner = self.inner.lock().expect("download queue lock poisoned");
                match inner.next_index() {
                    Some(index) => {
                        let entry = inner.pending.remove(index);
                        inner.current = Some(CurrentEntry {
                            key: entry.key.clone(),
                            waiters: entry.waiters,
                            discard: false,
                        });
                        self.publish_locked(&inner);
                        Some((entry.key, entry.notification_date, entry.force))
                    }
                    None => {
                        inner.worker_running = false;
                        inner.run_completed = 0;
                        self.publish_locked(&inner);
                        None
                    }
                }
            };

            let Some((key, notification_date, force)) = next else {
                return;
            };

            let mut item = self
                .store
                .get_item_sync(&key.url, key.media_type)
                .unwrap_or_else(|| CacheItem::new(key.clone()));
            item.mark_downloading(force);
            if item.notification_date.is_none() {
                item.notification_date = notification_date;
            }
            self.store.apply(item);

            self.event_bus
                .emit(CoreEvent::Cache(CacheEvent::DownloadStarted {
                    url: key.url.clone(),
                    media_type: key.media_type.as_str().to_string(),
                }))
                .ok();

            let (result_item, success) = self.execute_download(&key, notification_date).await;

            let waiters = {
                let mut inner = self.inner.lock().expect("download queue lock poisoned");
                let current = inner.current.take();
                if success {
                    inner.completed_count += 1;
                } else {
                    inner.failed_count += 1;
                }
                inner.run_completed += 1;
                self.publish_locked(&inner);
                current.map(|c| c.waiters).unwrap_or_default()
            };

            for waiter in waiters {
                waiter.send(result_item.clone()).ok();
            }
        }
    }

    /// Run the retry loop for one item and write the outcome to the store.
    async fn execute_download(&self, key: &CacheKey, notification_date: Option<i64>) -> (CacheItem, bool) {
        let base_path = self
            .base_path
            .lock()
            .expect("download queue lock poisoned")
            .clone();

        let mut last_error = "download not attempted".to_string();
        let mut gone = false;

        for attempt in 1..=self.config.max_retry_attempts {
            let outcome = match &base_path {
                Some(base) => self.attempt_download(key, base).await,
                None => Err(CacheError::InvalidConfig(
                    "media cache directory not initialized".to_string(),
                )),
            };

            match outcome {
                Ok(size_and_path) => {
                    let (local_path, size_bytes) = size_and_path;
                    let mut item = self
                        .store
                        .get_item_sync(&key.url, key.media_type)
                        .unwrap_or_else(|| CacheItem::new(key.clone()));
                    item.mark_cached(
                        local_path,
                        size_bytes,
                        chrono::Utc::now().timestamp(),
                        notification_date,
                    );
                    self.store.apply(item.clone());

                    self.event_bus
                        .emit(CoreEvent::Cache(CacheEvent::DownloadCompleted {
                            url: key.url.clone(),
                            media_type: key.media_type.as_str().to_string(),
                            size_bytes,
                        }))
                        .ok();
                    debug!(url = %key.url, size_bytes, "Media download completed");
                    return (item, true);
                }
                Err(e) => {
                    gone = matches!(&e, CacheError::Bridge(bridge) if bridge.is_gone());
                    last_error = e.to_string();
                    if gone {
                        break;
                    }
                    if self.current_discarded(key) {
                        debug!(url = %key.url, "Item removed mid-flight, skipping remaining attempts");
                        break;
                    }
                    if attempt < self.config.max_retry_attempts {
                        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                        debug!(url = %key.url, attempt, error = %last_error, "Download attempt failed, retrying");
                        sleep(delay).await;
                    }
                }
            }
        }

        // Only gone-class statuses park the item; an exhausted retry budget
        // leaves the failure transient so the next plain request tries again.
        let mut item = self
            .store
            .get_item_sync(&key.url, key.media_type)
            .unwrap_or_else(|| CacheItem::new(key.clone()));
        item.mark_failed(last_error.clone(), gone);
        self.store.apply(item.clone());

        warn!(url = %key.url, error = %last_error, gone, "Media download failed");
        self.event_bus
            .emit(CoreEvent::Cache(CacheEvent::DownloadFailed {
                url: key.url.clone(),
                media_type: key.media_type.as_str().to_string(),
                message: last_error,
                permanent: gone,
            }))
            .ok();
        (item, false)
    }

    /// Whether the in-flight entry for `key` was removed by the caller.
    fn current_discarded(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .expect("download queue lock poisoned")
            .current
            .as_ref()
            .is_some_and(|c| c.key == *key && c.discard)
    }

    /// One network attempt: fetch, then write the file.
    async fn attempt_download(&self, key: &CacheKey, base: &std::path::Path) -> Result<(PathBuf, u64)> {
        let request = HttpRequest::get(&key.url).timeout(self.config.download_timeout);
        let response = timeout(self.config.download_timeout, self.http_client.execute(request))
            .await
            .map_err(|_| {
                CacheError::Bridge(bridge_traits::BridgeError::OperationFailed(format!(
                    "download timed out after {:?}",
                    self.config.download_timeout
                )))
            })??;

        if !response.is_success() {
            return Err(CacheError::Bridge(bridge_traits::BridgeError::Http {
                status: response.status,
                message: format!("download failed with HTTP {}", response.status),
            }));
        }

        let local_path = base.join(key.cache_file_name());
        let size_bytes = response.body.len() as u64;
        self.fs.write_file(&local_path, response.body).await?;
        Ok((local_path, size_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteCacheMetadataRepository;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::HttpResponse;
    use bridge_traits::storage::FileMetadata;
    use bytes::Bytes;
    use core_store::db::{DatabaseConfig, DurableDatabase};
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    struct MemoryFs;

    #[async_trait]
    impl FileSystemAccess for MemoryFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/cache"))
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/data"))
        }
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(true)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: false,
            })
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn copy_file(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    /// Scripted HTTP client: per-URL status codes, call recording, and an
    /// optional gate that holds one URL's response until released.
    struct ScriptedClient {
        calls: StdMutex<Vec<String>>,
        statuses: StdMutex<HashMap<String, u16>>,
        hold_url: Option<String>,
        hold: TokioMutex<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                statuses: StdMutex::new(HashMap::new()),
                hold_url: None,
                hold: TokioMutex::new(None),
            }
        }

        fn with_status(self, url: &str, status: u16) -> Self {
            self.statuses.lock().unwrap().insert(url.to_string(), status);
            self
        }

        fn holding(mut self, url: &str) -> (Self, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            self.hold_url = Some(url.to_string());
            self.hold = TokioMutex::new(Some(rx));
            (self, tx)
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.calls.lock().unwrap().push(request.url.clone());
            if self.hold_url.as_deref() == Some(request.url.as_str()) {
                if let Some(rx) = self.hold.lock().await.take() {
                    rx.await.ok();
                }
            }
            let status = self
                .statuses
                .lock()
                .unwrap()
                .get(&request.url)
                .copied()
                .unwrap_or(200);
            Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: Bytes::from_static(b"media-bytes"),
            })
        }

        async fn download_stream(
            &self,
            _url: String,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
            Err(bridge_traits::BridgeError::NotAvailable(
                "not used in tests".to_string(),
            ))
        }
    }

    async fn test_queue(client: Arc<ScriptedClient>) -> Arc<DownloadQueue> {
        let db = DurableDatabase::open(DatabaseConfig::in_memory())
            .await
            .unwrap();
        let repo = Arc::new(SqliteCacheMetadataRepository::new(Arc::new(db)));
        let bus = Arc::new(EventBus::default());
        let fs = Arc::new(MemoryFs);
        let store = Arc::new(CacheStore::new(repo, fs.clone(), bus.clone()));
        store.initialize().await.unwrap();

        let config = CacheConfig::new().with_retry_base_delay(Duration::from_millis(1));
        let queue = Arc::new(DownloadQueue::new(config, store, client, fs, bus));
        queue.initialize().await.unwrap();
        queue
    }

    #[tokio::test]
    async fn successful_download_resolves_with_cached_item() {
        let client = Arc::new(ScriptedClient::new());
        let queue = test_queue(client.clone()).await;

        let item = queue
            .download_media(
                DownloadRequest::new("https://cdn/a.jpg", MediaType::Image)
                    .with_notification_date(42),
            )
            .await
            .unwrap();

        assert!(item.is_cached());
        assert_eq!(item.size_bytes, 11);
        assert_eq!(item.notification_date, Some(42));
        assert!(item.local_path.as_ref().unwrap().starts_with("/cache/media_cache/"));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn cached_item_short_circuits_without_network() {
        let client = Arc::new(ScriptedClient::new());
        let queue = test_queue(client.clone()).await;
        let request = DownloadRequest::new("https://cdn/a.jpg", MediaType::Image);

        queue.download_media(request.clone()).await.unwrap();
        let again = queue.download_media(request).await.unwrap();

        assert!(again.is_cached());
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_key_share_one_download() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/a.jpg");
        let client = Arc::new(client);
        let queue = test_queue(client.clone()).await;

        let request = DownloadRequest::new("https://cdn/a.jpg", MediaType::Image);
        let first = {
            let queue = queue.clone();
            let request = request.clone();
            tokio::spawn(async move { queue.download_media(request).await })
        };

        // Wait until the first request is in flight, then pile on.
        while !queue.is_in_queue("https://cdn/a.jpg", MediaType::Image) {
            tokio::task::yield_now().await;
        }
        let second = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.download_media(request).await })
        };
        tokio::task::yield_now().await;
        release.send(()).ok();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert!(a.is_cached());
        assert_eq!(a, b);
        assert_eq!(client.calls().len(), 1, "expected a single shared fetch");
    }

    #[tokio::test]
    async fn pending_items_execute_by_priority_then_fifo() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/hold.jpg");
        let client = Arc::new(client);
        let queue = test_queue(client.clone()).await;

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/hold.jpg", MediaType::Image))
                    .await
            })
        };
        while queue.queue_state().current_item.is_none() {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for (url, priority) in [
            ("https://cdn/p2.jpg", 2),
            ("https://cdn/p9.jpg", 9),
            ("https://cdn/p5.jpg", 5),
        ] {
            let task_queue = queue.clone();
            let request = DownloadRequest::new(url, MediaType::Image).with_priority(priority);
            handles.push(tokio::spawn(async move { task_queue.download_media(request).await }));
            while !queue.is_in_queue(url, MediaType::Image) {
                tokio::task::yield_now().await;
            }
        }

        release.send(()).ok();
        holder.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            client.calls(),
            vec![
                "https://cdn/hold.jpg",
                "https://cdn/p9.jpg",
                "https://cdn/p5.jpg",
                "https://cdn/p2.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn repeated_request_merges_with_max_priority() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/hold.jpg");
        let client = Arc::new(client);
        let queue = test_queue(client.clone()).await;

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/hold.jpg", MediaType::Image))
                    .await
            })
        };
        while queue.queue_state().current_item.is_none() {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for priority in [1, 8] {
            let task_queue = queue.clone();
            let request =
                DownloadRequest::new("https://cdn/a.jpg", MediaType::Image).with_priority(priority);
            handles.push(tokio::spawn(async move { task_queue.download_media(request).await }));
            while !queue.is_in_queue("https://cdn/a.jpg", MediaType::Image) {
                tokio::task::yield_now().await;
            }
            // Let the spawned request run to its merge before observing state;
            // the wait loop above exits immediately once the key is pending.
            tokio::task::yield_now().await;
        }

        let state = queue.queue_state();
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].priority, 8);

        release.send(()).ok();
        holder.await.unwrap().unwrap();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_cached());
        }
        // hold + one merged fetch
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn gone_status_fails_permanently_without_retry() {
        let client = Arc::new(ScriptedClient::new().with_status("https://cdn/gone.jpg", 410));
        let queue = test_queue(client.clone()).await;
        let request = DownloadRequest::new("https://cdn/gone.jpg", MediaType::Image);

        let item = queue.download_media(request.clone()).await.unwrap();
        assert!(item.is_permanent_failure);
        assert!(!item.is_cached());
        assert_eq!(client.calls().len(), 1, "gone must not be retried");

        // Next plain request resolves from the flag, no network.
        let again = queue.download_media(request).await.unwrap();
        assert!(again.is_permanent_failure);
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn transient_exhaustion_stays_retryable_on_next_request() {
        let client = Arc::new(ScriptedClient::new().with_status("https://cdn/flaky.jpg", 503));
        let queue = test_queue(client.clone()).await;
        let request = DownloadRequest::new("https://cdn/flaky.jpg", MediaType::Image);

        let item = queue.download_media(request.clone()).await.unwrap();
        assert!(!item.is_permanent_failure, "a server blip must not park the item");
        assert!(!item.is_cached());
        assert!(item.last_error.is_some());
        assert_eq!(client.calls().len(), 3, "in-run budget is three attempts");

        // The next plain request tries the network again and can succeed.
        client
            .statuses
            .lock()
            .unwrap()
            .insert("https://cdn/flaky.jpg".to_string(), 200);
        let item = queue.download_media(request).await.unwrap();
        assert!(item.is_cached());
        assert_eq!(client.calls().len(), 4);
    }

    #[tokio::test]
    async fn removing_in_flight_item_skips_remaining_attempts() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/flaky.jpg");
        let client = Arc::new(client.with_status("https://cdn/flaky.jpg", 503));
        let queue = test_queue(client.clone()).await;

        let download = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/flaky.jpg", MediaType::Image))
                    .await
            })
        };
        while queue.queue_state().current_item.is_none() {
            tokio::task::yield_now().await;
        }

        assert!(queue.remove_from_queue("https://cdn/flaky.jpg", MediaType::Image));
        release.send(()).ok();

        let item = download.await.unwrap().unwrap();
        assert!(!item.is_cached());
        assert!(!item.is_permanent_failure);
        assert_eq!(
            client.calls().len(),
            1,
            "a removed item must not burn the remaining retry budget"
        );
    }

    #[tokio::test]
    async fn force_retries_a_permanently_failed_item() {
        let client = Arc::new(ScriptedClient::new().with_status("https://cdn/a.jpg", 410));
        let queue = test_queue(client.clone()).await;

        let failed = queue
            .download_media(DownloadRequest::new("https://cdn/a.jpg", MediaType::Image))
            .await
            .unwrap();
        assert!(failed.is_permanent_failure);

        client
            .statuses
            .lock()
            .unwrap()
            .insert("https://cdn/a.jpg".to_string(), 200);
        let item = queue
            .force_media_download("https://cdn/a.jpg", MediaType::Image, None)
            .await
            .unwrap();
        assert!(item.is_cached());
        assert!(!item.is_permanent_failure);
    }

    #[tokio::test]
    async fn progress_is_bounded_and_settles_at_one_hundred() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/hold.jpg");
        let client = Arc::new(client);
        let queue = test_queue(client.clone()).await;
        let progress = queue.watch_progress();
        assert_eq!(*progress.borrow(), 100, "idle queue reports 100");

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/hold.jpg", MediaType::Image))
                    .await
            })
        };
        while queue.queue_state().current_item.is_none() {
            tokio::task::yield_now().await;
        }

        let during = *progress.borrow();
        assert!(during < 100, "in-flight burst must report below 100");

        release.send(()).ok();
        holder.await.unwrap().unwrap();
        assert_eq!(*queue.watch_progress().borrow(), 100);
    }

    #[tokio::test]
    async fn remove_from_queue_drops_pending_item_before_execution() {
        let (client, release) = ScriptedClient::new().holding("https://cdn/hold.jpg");
        let client = Arc::new(client);
        let queue = test_queue(client.clone()).await;

        let holder = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/hold.jpg", MediaType::Image))
                    .await
            })
        };
        while queue.queue_state().current_item.is_none() {
            tokio::task::yield_now().await;
        }

        let doomed = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .download_media(DownloadRequest::new("https://cdn/doomed.jpg", MediaType::Image))
                    .await
            })
        };
        while !queue.is_in_queue("https://cdn/doomed.jpg", MediaType::Image) {
            tokio::task::yield_now().await;
        }

        assert!(queue.remove_from_queue("https://cdn/doomed.jpg", MediaType::Image));
        // The removed waiter resolves with the item's current (absent) state.
        let item = doomed.await.unwrap().unwrap();
        assert!(!item.is_cached());

        release.send(()).ok();
        holder.await.unwrap().unwrap();
        assert!(!client.calls().iter().any(|u| u.contains("doomed")));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let client = Arc::new(ScriptedClient::new());
        let queue = test_queue(client).await;
        queue.shutdown();

        let result = queue
            .download_media(DownloadRequest::new("https://cdn/a.jpg", MediaType::Image))
            .await;
        assert!(matches!(result, Err(CacheError::Shutdown)));
    }
}
