//! Tiered database recovery
//!
//! Local recovery escalates through four tiers, each one best-effort until
//! the last:
//!
//! 1. snapshot the database files next to the data directory,
//! 2. export a logical dump of every row,
//! 3. destructively reset the database,
//! 4. re-import the dump when the export succeeded.
//!
//! Snapshot and export failures degrade the run to a plain reset; an import
//! failure falls back to a second reset. Only a failing reset is terminal,
//! because at that point there is no working store to offer the user.
//!
//! Backend recovery resets and refetches everything from the backend. iCloud
//! recovery re-hydrates notification content from the platform sync store
//! without touching bucket structure, for the case where the backend is
//! unreachable but the platform copy survived.

use crate::error::{RecoveryError, Result};
use crate::state::{CorruptionInfo, RecoveryState, RecoveryStrategy};
use async_trait::async_trait;
use bridge_traits::cloudkit::CloudKitBridge;
use bridge_traits::remote::RemoteDataSource;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, RecoveryEvent};
use core_store::db::{DatabaseDump, DurableDatabase};
use core_store::models::{Bucket, Notification};
use core_store::repositories::{BucketRepository, NotificationRepository};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// The slice of the durable database the recovery tiers drive.
///
/// [`DurableDatabase`] is the production implementation; the seam lets tests
/// fail individual stages and exercise the fall-through paths.
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    /// Paths of the files backing the store; empty for in-memory databases.
    fn database_files(&self) -> Vec<PathBuf>;

    /// Read every row into a logical dump.
    async fn export_dump(&self) -> core_store::Result<DatabaseDump>;

    /// Write a logical dump back into the store.
    async fn import_dump(&self, dump: &DatabaseDump) -> core_store::Result<()>;

    /// Destructively reset to an empty schema.
    async fn reset(&self) -> core_store::Result<()>;
}

#[async_trait]
impl StoreLifecycle for DurableDatabase {
    fn database_files(&self) -> Vec<PathBuf> {
        DurableDatabase::database_files(self)
    }

    async fn export_dump(&self) -> core_store::Result<DatabaseDump> {
        DurableDatabase::export_dump(self).await
    }

    async fn import_dump(&self, dump: &DatabaseDump) -> core_store::Result<()> {
        DurableDatabase::import_dump(self, dump).await
    }

    async fn reset(&self) -> core_store::Result<()> {
        DurableDatabase::reset(self).await
    }
}

/// Orchestrates corruption intake and database recovery.
pub struct RecoveryService {
    db: Arc<dyn StoreLifecycle>,
    fs: Arc<dyn FileSystemAccess>,
    remote: Arc<dyn RemoteDataSource>,
    sync_bridge: Arc<dyn CloudKitBridge>,
    notifications: Arc<dyn NotificationRepository>,
    buckets: Arc<dyn BucketRepository>,
    event_bus: Arc<EventBus>,
    state_tx: watch::Sender<RecoveryState>,
    recovering: AtomicBool,
}

impl RecoveryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn StoreLifecycle>,
        fs: Arc<dyn FileSystemAccess>,
        remote: Arc<dyn RemoteDataSource>,
        sync_bridge: Arc<dyn CloudKitBridge>,
        notifications: Arc<dyn NotificationRepository>,
        buckets: Arc<dyn BucketRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RecoveryState::all_clear());
        Self {
            db,
            fs,
            remote,
            sync_bridge,
            notifications,
            buckets,
            event_bus,
            state_tx,
            recovering: AtomicBool::new(false),
        }
    }

    /// Watch the recovery state. Replays the current state on subscribe.
    pub fn watch_state(&self) -> watch::Receiver<RecoveryState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> RecoveryState {
        self.state_tx.borrow().clone()
    }

    /// Record a corruption report. Does not start recovery on its own; the
    /// host decides which strategy to run.
    pub fn handle_corruption(&self, source: &str, message: &str) {
        info!(source, message, "Corruption reported to recovery");
        let info = CorruptionInfo {
            source: source.to_string(),
            message: message.to_string(),
            detected_at: chrono::Utc::now().timestamp(),
        };
        self.state_tx.send_modify(|state| {
            state.visible = true;
            state.last_corruption = Some(info);
            state.status_message = Some("Database corruption detected".to_string());
        });
    }

    /// Route corruption events from the bus into [`Self::handle_corruption`].
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let mut events = self.event_bus.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CoreEvent::Recovery(RecoveryEvent::CorruptionDetected {
                        source,
                        message,
                    })) => service.handle_corruption(&source, &message),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Recovery listener fell behind on events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Clear the recovery banner. Ignored while a recovery is running.
    pub fn dismiss(&self) {
        if self.recovering.load(Ordering::SeqCst) {
            return;
        }
        self.state_tx.send_replace(RecoveryState::all_clear());
    }

    /// Local tiered recovery. No-op when a recovery is already running.
    #[instrument(skip(self))]
    pub async fn recover_local(&self) -> Result<()> {
        let Some(_guard) = self.begin(RecoveryStrategy::Local) else {
            return Ok(());
        };

        self.set_status("Snapshotting database files");
        let backups = self.snapshot_database_files().await;
        self.state_tx
            .send_modify(|state| state.last_backup_files = backups);

        self.set_status("Exporting store contents");
        let dump = match self.db.export_dump().await {
            Ok(dump) => {
                let export_file = self.write_export_file(&dump).await;
                self.state_tx
                    .send_modify(|state| state.last_export_file = export_file);
                Some(dump)
            }
            Err(e) => {
                warn!(error = %e, "Export failed, recovery degrades to a plain reset");
                None
            }
        };

        self.set_status("Resetting database");
        if let Err(e) = self.db.reset().await {
            return Err(self.fail_terminal(RecoveryStrategy::Local, e));
        }

        if let Some(dump) = dump {
            self.set_status("Re-importing store contents");
            if let Err(e) = self.db.import_dump(&dump).await {
                warn!(error = %e, "Import failed, falling back to an empty store");
                if let Err(e) = self.db.reset().await {
                    return Err(self.fail_terminal(RecoveryStrategy::Local, e));
                }
            }
        }

        self.complete(RecoveryStrategy::Local);
        Ok(())
    }

    /// Reset the store and refetch everything from the backend. No-op when a
    /// recovery is already running.
    #[instrument(skip(self))]
    pub async fn recover_from_backend(&self) -> Result<()> {
        let Some(_guard) = self.begin(RecoveryStrategy::Backend) else {
            return Ok(());
        };

        self.set_status("Resetting database");
        if let Err(e) = self.db.reset().await {
            return Err(self.fail_terminal(RecoveryStrategy::Backend, e));
        }

        self.set_status("Refetching from backend");
        let (buckets, notifications) =
            match tokio::try_join!(self.remote.fetch_buckets(), self.remote.fetch_notifications()) {
                Ok(fetched) => fetched,
                Err(e) => return Err(self.fail(RecoveryStrategy::Backend, RecoveryError::from(e))),
            };

        self.set_status("Persisting fetched content");
        let bucket_rows: Vec<Bucket> = buckets.iter().map(Bucket::from_remote).collect();
        if let Err(e) = self.buckets.save_batch(&bucket_rows).await {
            return Err(self.fail(RecoveryStrategy::Backend, RecoveryError::PersistFailed(e)));
        }
        let rows = decode_notifications(&notifications);
        if let Err(e) = self.notifications.upsert_batch(&rows).await {
            return Err(self.fail(RecoveryStrategy::Backend, RecoveryError::PersistFailed(e)));
        }

        self.complete(RecoveryStrategy::Backend);
        Ok(())
    }

    /// Re-hydrate notification content from the platform sync store. Bucket
    /// structure is left untouched. No-op when a recovery is already running.
    #[instrument(skip(self))]
    pub async fn recover_from_icloud(&self) -> Result<()> {
        let Some(_guard) = self.begin(RecoveryStrategy::ICloud) else {
            return Ok(());
        };

        self.set_status("Fetching notifications from the platform store");
        let fetched = match self.sync_bridge.fetch_all_notifications().await {
            Ok(result) if result.success => result,
            Ok(_) => {
                return Err(self.fail(
                    RecoveryStrategy::ICloud,
                    RecoveryError::RefetchFailed(bridge_traits::BridgeError::OperationFailed(
                        "platform store fetch reported failure".to_string(),
                    )),
                ))
            }
            Err(e) => return Err(self.fail(RecoveryStrategy::ICloud, RecoveryError::from(e))),
        };

        self.set_status("Persisting fetched notifications");
        let rows = decode_notifications(&fetched.notifications);
        if let Err(e) = self.notifications.upsert_batch(&rows).await {
            return Err(self.fail(RecoveryStrategy::ICloud, RecoveryError::PersistFailed(e)));
        }

        self.complete(RecoveryStrategy::ICloud);
        Ok(())
    }

    /// Try to claim the recovery slot; `None` means one is already running.
    fn begin(&self, strategy: RecoveryStrategy) -> Option<RecoveryGuard<'_>> {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(strategy = strategy.as_str(), "Recovery already running, ignoring request");
            return None;
        }

        info!(strategy = strategy.as_str(), "Recovery started");
        self.state_tx.send_modify(|state| {
            state.is_recovering = true;
            state.strategy = Some(strategy);
            state.last_error = None;
        });
        self.event_bus
            .emit(CoreEvent::Recovery(RecoveryEvent::RecoveryStarted {
                strategy: strategy.as_str().to_string(),
            }))
            .ok();
        Some(RecoveryGuard { flag: &self.recovering })
    }

    fn set_status(&self, message: &str) {
        self.state_tx
            .send_modify(|state| state.status_message = Some(message.to_string()));
    }

    fn complete(&self, strategy: RecoveryStrategy) {
        info!(strategy = strategy.as_str(), "Recovery completed");
        self.state_tx.send_replace(RecoveryState::all_clear());
        self.event_bus
            .emit(CoreEvent::Recovery(RecoveryEvent::RecoveryCompleted {
                strategy: strategy.as_str().to_string(),
            }))
            .ok();
    }

    /// A failure that leaves the store usable. Still surfaced to the host:
    /// `visible` latches on every unresolved failure until dismissed.
    fn fail(&self, strategy: RecoveryStrategy, error: RecoveryError) -> RecoveryError {
        warn!(strategy = strategy.as_str(), error = %error, "Recovery failed");
        self.state_tx.send_modify(|state| {
            state.visible = true;
            state.is_recovering = false;
            state.last_error = Some(error.to_string());
            state.status_message = None;
        });
        self.event_bus
            .emit(CoreEvent::Recovery(RecoveryEvent::RecoveryFailed {
                strategy: strategy.as_str().to_string(),
                message: error.to_string(),
            }))
            .ok();
        error
    }

    /// The reset itself failed: no working store remains, surface it.
    fn fail_terminal(
        &self,
        strategy: RecoveryStrategy,
        error: core_store::StoreError,
    ) -> RecoveryError {
        let error = RecoveryError::ResetFailed(error);
        warn!(strategy = strategy.as_str(), error = %error, "Recovery failed terminally");
        self.state_tx.send_modify(|state| {
            state.visible = true;
            state.is_recovering = false;
            state.last_error = Some(error.to_string());
            state.status_message = None;
        });
        self.event_bus
            .emit(CoreEvent::Recovery(RecoveryEvent::RecoveryFailed {
                strategy: strategy.as_str().to_string(),
                message: error.to_string(),
            }))
            .ok();
        error
    }

    /// Copy the database files into a timestamped backups directory.
    /// Best-effort throughout.
    async fn snapshot_database_files(&self) -> Vec<String> {
        let files = self.db.database_files();
        if files.is_empty() {
            return Vec::new();
        }

        let backup_dir = match self.fs.get_data_directory().await {
            Ok(dir) => dir.join("backups"),
            Err(e) => {
                warn!(error = %e, "No data directory for backups, skipping snapshot");
                return Vec::new();
            }
        };

        let timestamp = chrono::Utc::now().timestamp();
        let mut backups = Vec::new();
        for file in files {
            match self.fs.exists(&file).await {
                Ok(true) => {}
                _ => continue,
            }
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "database".to_string());
            let target = backup_dir.join(format!("{name}.corrupt-{timestamp}"));
            match self.fs.copy_file(&file, &target).await {
                Ok(()) => backups.push(target.to_string_lossy().into_owned()),
                Err(e) => warn!(file = %file.display(), error = %e, "Snapshot copy failed"),
            }
        }
        backups
    }

    /// Write the logical dump as JSON next to the backups. Best-effort.
    async fn write_export_file(&self, dump: &core_store::db::DatabaseDump) -> Option<String> {
        let dir = match self.fs.get_data_directory().await {
            Ok(dir) => dir.join("exports"),
            Err(e) => {
                warn!(error = %e, "No data directory for exports");
                return None;
            }
        };
        let bytes = match serde_json::to_vec(dump) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dump serialization failed");
                return None;
            }
        };

        let path = dir.join(format!(
            "store-export-{}.json",
            chrono::Utc::now().timestamp()
        ));
        match self.fs.write_file(&path, Bytes::from(bytes)).await {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!(error = %e, "Export file write failed");
                None
            }
        }
    }
}

/// Releases the recovery slot even when a tier errors out early.
struct RecoveryGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn decode_notifications(remote: &[bridge_traits::RemoteNotification]) -> Vec<Notification> {
    remote
        .iter()
        .filter_map(|n| match Notification::from_remote(n) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(id = %n.id, error = %e, "Skipping undecodable notification");
                None
            }
        })
        .collect()
}
