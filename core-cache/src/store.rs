//! In-memory cache metadata store with observable projections
//!
//! All reads are served from an in-memory map guarded by a plain mutex, so
//! lookups never touch the database and never block on I/O. Mutations update
//! the map first, publish to the watch channels while still holding the lock
//! (which serializes emission order), and then hand the row to a background
//! persistence worker. A persistence failure is logged but never rolled back;
//! a corruption failure is additionally forwarded on the event bus so the
//! recovery layer can react.

use crate::error::{CacheError, Result};
use crate::models::{CacheItem, CacheKey, CacheSnapshot, CacheStats, MediaType};
use crate::repository::CacheMetadataRepository;
use bridge_traits::storage::FileSystemAccess;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, RecoveryEvent};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum PersistOp {
    Upsert(CacheItem),
    Clear,
}

struct StoreInner {
    items: HashMap<CacheKey, CacheItem>,
    item_watches: HashMap<CacheKey, watch::Sender<Option<CacheItem>>>,
    type_watches: HashMap<MediaType, watch::Sender<Vec<CacheItem>>>,
    metadata_watch: watch::Sender<HashMap<CacheKey, CacheItem>>,
}

impl StoreInner {
    fn new() -> Self {
        let (metadata_watch, _) = watch::channel(HashMap::new());
        Self {
            items: HashMap::new(),
            item_watches: HashMap::new(),
            type_watches: HashMap::new(),
            metadata_watch,
        }
    }

    /// Recompute and publish every projection affected by `key`.
    ///
    /// Called with the item already written into `items`, under the lock.
    fn publish(&mut self, key: &CacheKey) {
        if let Some(tx) = self.item_watches.get(key) {
            tx.send_replace(self.items.get(key).cloned());
        }
        let projection = self.type_projection(key.media_type);
        self.type_watches
            .entry(key.media_type)
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .send_replace(projection);
        self.metadata_watch.send_replace(self.items.clone());
    }

    fn publish_all(&mut self) {
        let keys: Vec<CacheKey> = self.items.keys().cloned().collect();
        for (key, tx) in &self.item_watches {
            tx.send_replace(self.items.get(key).cloned());
        }
        for media_type in MediaType::ALL {
            if self.type_watches.contains_key(&media_type)
                || keys.iter().any(|k| k.media_type == media_type)
            {
                let projection = self.type_projection(media_type);
                self.type_watches
                    .entry(media_type)
                    .or_insert_with(|| watch::channel(Vec::new()).0)
                    .send_replace(projection);
            }
        }
        self.metadata_watch.send_replace(self.items.clone());
    }

    /// Items of one media type, most recent notification first.
    ///
    /// User-deleted entries are filtered out here rather than by each
    /// subscriber; the per-item and full-map streams still carry them.
    fn type_projection(&self, media_type: MediaType) -> Vec<CacheItem> {
        let mut items: Vec<CacheItem> = self
            .items
            .values()
            .filter(|i| i.key.media_type == media_type && !i.is_user_deleted)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.notification_date
                .cmp(&a.notification_date)
                .then(b.downloaded_at.cmp(&a.downloaded_at))
                .then(a.key.url.cmp(&b.key.url))
        });
        items
    }

    fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            calculated_at: chrono::Utc::now().timestamp(),
            ..CacheStats::default()
        };
        for item in self.items.values() {
            if item.is_user_deleted {
                continue;
            }
            if item.is_downloading {
                stats.downloading_items += 1;
            }
            if item.is_permanent_failure {
                stats.failed_items += 1;
            }
            if item.local_path.is_some() {
                stats.total_items += 1;
                stats.total_bytes += item.size_bytes;
                *stats.items_by_type.entry(item.key.media_type).or_insert(0) += 1;
            }
        }
        stats
    }
}

/// Observable media cache metadata store.
pub struct CacheStore {
    repository: Arc<dyn CacheMetadataRepository>,
    fs: Arc<dyn FileSystemAccess>,
    event_bus: Arc<EventBus>,
    inner: StdMutex<StoreInner>,
    persist_tx: StdMutex<Option<mpsc::UnboundedSender<PersistOp>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl CacheStore {
    /// Create a store and spawn its persistence worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        repository: Arc<dyn CacheMetadataRepository>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run_persistence(
            Arc::clone(&repository),
            Arc::clone(&event_bus),
            persist_rx,
        ));

        Self {
            repository,
            fs,
            event_bus,
            inner: StdMutex::new(StoreInner::new()),
            persist_tx: StdMutex::new(Some(persist_tx)),
            worker: StdMutex::new(Some(worker)),
        }
    }

    /// Create the schema and hydrate the in-memory map from disk.
    ///
    /// Rows still flagged as downloading are leftovers from a previous run
    /// that never finished; they are reset so the item reads as absent
    /// rather than stuck.
    pub async fn initialize(&self) -> Result<()> {
        self.repository.initialize().await?;
        let mut loaded = self.repository.find_all().await?;

        let mut stale = Vec::new();
        for item in &mut loaded {
            if item.is_downloading {
                item.is_downloading = false;
                stale.push(item.clone());
            }
        }

        {
            let mut inner = self.inner.lock().expect("cache store lock poisoned");
            inner.items = loaded
                .into_iter()
                .map(|item| (item.key.clone(), item))
                .collect();
            inner.publish_all();
        }

        for item in stale {
            self.enqueue_persist(PersistOp::Upsert(item));
        }

        info!(
            items = self.inner.lock().expect("cache store lock poisoned").items.len(),
            "Cache metadata loaded"
        );
        Ok(())
    }

    /// Synchronous lookup of one item's current disposition.
    ///
    /// Returns whatever is in the map, including soft-deleted and failed
    /// rows; `None` means the URL was never requested.
    pub fn get_item_sync(&self, url: &str, media_type: MediaType) -> Option<CacheItem> {
        let key = CacheKey::new(url, media_type);
        self.inner
            .lock()
            .expect("cache store lock poisoned")
            .items
            .get(&key)
            .cloned()
    }

    /// Aggregate stats plus the current item list, taken atomically.
    pub fn get_cache_snapshot(&self) -> CacheSnapshot {
        let inner = self.inner.lock().expect("cache store lock poisoned");
        let mut items: Vec<CacheItem> = inner
            .items
            .values()
            .filter(|i| !i.is_user_deleted)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.notification_date
                .cmp(&a.notification_date)
                .then(a.key.url.cmp(&b.key.url))
        });
        CacheSnapshot {
            stats: inner.stats(),
            items,
        }
    }

    /// Aggregate stats only.
    pub fn get_stats(&self) -> CacheStats {
        self.inner.lock().expect("cache store lock poisoned").stats()
    }

    /// Watch one item. The receiver immediately holds the current
    /// disposition (`None` if never requested) and sees every later change.
    pub fn watch_item(&self, url: &str, media_type: MediaType) -> watch::Receiver<Option<CacheItem>> {
        let key = CacheKey::new(url, media_type);
        let mut inner = self.inner.lock().expect("cache store lock poisoned");
        let current = inner.items.get(&key).cloned();
        inner
            .item_watches
            .entry(key)
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }

    /// Watch the list of non-deleted items of one media type, sorted by
    /// notification recency.
    pub fn watch_items_by_type(&self, media_type: MediaType) -> watch::Receiver<Vec<CacheItem>> {
        let mut inner = self.inner.lock().expect("cache store lock poisoned");
        let projection = inner.type_projection(media_type);
        inner
            .type_watches
            .entry(media_type)
            .or_insert_with(|| watch::channel(projection).0)
            .subscribe()
    }

    /// Watch the full metadata map. Emits the complete map on every
    /// mutation, in mutation order.
    pub fn watch_metadata(&self) -> watch::Receiver<HashMap<CacheKey, CacheItem>> {
        self.inner
            .lock()
            .expect("cache store lock poisoned")
            .metadata_watch
            .subscribe()
    }

    /// Write one item into the map, publish, and schedule persistence.
    pub(crate) fn apply(&self, item: CacheItem) {
        let key = item.key.clone();
        {
            let mut inner = self.inner.lock().expect("cache store lock poisoned");
            inner.items.insert(key.clone(), item.clone());
            inner.publish(&key);
        }
        self.enqueue_persist(PersistOp::Upsert(item));
    }

    /// Soft-delete one item: the local file is removed best-effort, the row
    /// stays with the deleted flag set.
    pub async fn delete_item(&self, url: &str, media_type: MediaType) -> Result<()> {
        let key = CacheKey::new(url, media_type);
        let mut item = match self.get_item_sync(url, media_type) {
            Some(item) => item,
            None => return Ok(()),
        };

        if let Some(path) = item.local_path.clone() {
            if let Err(e) = self.fs.delete_file(Path::new(&path)).await {
                warn!(url, error = %e, "Failed to remove cached file, marking deleted anyway");
            }
        }

        item.mark_user_deleted();
        self.apply(item);

        self.event_bus
            .emit(CoreEvent::Cache(CacheEvent::ItemDeleted {
                url: key.url,
                media_type: key.media_type.as_str().to_string(),
            }))
            .ok();
        Ok(())
    }

    /// Remove every item, its local file, and all persisted metadata.
    pub async fn clear(&self) -> Result<u64> {
        let items: Vec<CacheItem> = {
            let inner = self.inner.lock().expect("cache store lock poisoned");
            inner.items.values().cloned().collect()
        };

        for item in &items {
            if let Some(path) = &item.local_path {
                if let Err(e) = self.fs.delete_file(Path::new(path)).await {
                    warn!(url = %item.key.url, error = %e, "Failed to remove cached file during clear");
                }
            }
        }

        {
            let mut inner = self.inner.lock().expect("cache store lock poisoned");
            inner.items.clear();
            inner.publish_all();
        }
        self.enqueue_persist(PersistOp::Clear);

        let removed = items.len() as u64;
        self.event_bus
            .emit(CoreEvent::Cache(CacheEvent::Cleared {
                items_removed: removed,
            }))
            .ok();
        info!(items_removed = removed, "Cache cleared");
        Ok(removed)
    }

    /// Drain the persistence queue and stop the worker.
    pub async fn shutdown(&self) {
        let tx = self.persist_tx.lock().expect("cache store lock poisoned").take();
        drop(tx);
        let handle = self.worker.lock().expect("cache store lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache persistence worker did not shut down cleanly");
            }
        }
        debug!("Cache store shut down");
    }

    fn enqueue_persist(&self, op: PersistOp) {
        let guard = self.persist_tx.lock().expect("cache store lock poisoned");
        if let Some(tx) = guard.as_ref() {
            // The worker outlives all senders, so this only fails after
            // shutdown, when dropping the write is correct.
            tx.send(op).ok();
        }
    }

    async fn run_persistence(
        repository: Arc<dyn CacheMetadataRepository>,
        event_bus: Arc<EventBus>,
        mut rx: mpsc::UnboundedReceiver<PersistOp>,
    ) {
        while let Some(op) = rx.recv().await {
            let result = match &op {
                PersistOp::Upsert(item) => repository.upsert(item).await,
                PersistOp::Clear => repository.delete_all().await,
            };

            if let Err(e) = result {
                if let CacheError::Storage(store_err) = &e {
                    if store_err.is_corruption() {
                        warn!(error = %store_err, "Cache metadata write hit database corruption");
                        event_bus
                            .emit(CoreEvent::Recovery(RecoveryEvent::CorruptionDetected {
                                source: "cache".to_string(),
                                message: store_err.to_string(),
                            }))
                            .ok();
                        continue;
                    }
                }
                // In-memory state stays authoritative; the row is retried
                // the next time the item changes.
                warn!(error = %e, "Failed to persist cache metadata");
            }
        }
    }
}
