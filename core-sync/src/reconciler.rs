//! Network reconciliation
//!
//! One reconciliation run pulls the authoritative backend state, merges it
//! with the local store, and republishes the bucket read-model:
//!
//! 1. Fetch notifications and buckets concurrently; each fetch may fail
//!    independently and the run degrades instead of aborting.
//! 2. Insert fetched notifications that are missing locally. Existing rows
//!    are never overwritten, so local read state always survives.
//! 3. Report receipt of the newest fetched notification id, best-effort,
//!    only when it advances the stored marker.
//! 4. Save fetched buckets, or fall back to the local bucket table.
//! 5. Join buckets with per-bucket aggregates; local bucket rows a
//!    successful fetch no longer returned, and bucket ids that appear only
//!    in local notifications, become orphan entries.
//! 6. Publish the sorted list atomically on the watch channel.
//!
//! The run never rejects: every outcome, including total network failure,
//! resolves to a [`ReconcileOutcome`]. Concurrent calls share a single
//! in-flight run.

use crate::models::{sort_read_model, BucketWithStats, ReconcileOutcome};
use bridge_traits::remote::RemoteDataSource;
use core_runtime::events::{CoreEvent, EventBus, RecoveryEvent, SyncEvent};
use core_store::models::{Bucket, Notification};
use core_store::repositories::{BucketRepository, NotificationRepository, SyncStateRepository};
use core_store::StoreError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

type SharedRun = Shared<BoxFuture<'static, ReconcileOutcome>>;

/// Reconciles backend state with the local store and owns the bucket
/// read-model.
pub struct NetworkReconciler {
    remote: Arc<dyn RemoteDataSource>,
    notifications: Arc<dyn NotificationRepository>,
    buckets: Arc<dyn BucketRepository>,
    sync_state: Arc<dyn SyncStateRepository>,
    event_bus: Arc<EventBus>,
    read_model_tx: watch::Sender<Vec<BucketWithStats>>,
    inflight: Mutex<Option<SharedRun>>,
}

impl NetworkReconciler {
    pub fn new(
        remote: Arc<dyn RemoteDataSource>,
        notifications: Arc<dyn NotificationRepository>,
        buckets: Arc<dyn BucketRepository>,
        sync_state: Arc<dyn SyncStateRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (read_model_tx, _) = watch::channel(Vec::new());
        Self {
            remote,
            notifications,
            buckets,
            sync_state,
            event_bus,
            read_model_tx,
            inflight: Mutex::new(None),
        }
    }

    /// Watch the bucket read-model. Replays the current list on subscribe.
    pub fn watch_buckets(&self) -> watch::Receiver<Vec<BucketWithStats>> {
        self.read_model_tx.subscribe()
    }

    /// The currently published bucket list.
    pub fn current_buckets(&self) -> Vec<BucketWithStats> {
        self.read_model_tx.borrow().clone()
    }

    /// Run a reconciliation, or join the one already running.
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileOutcome {
        let run = {
            let mut guard = self.inflight.lock().await;
            match guard.as_ref() {
                Some(run) => run.clone(),
                None => {
                    // The run clears its own slot when it finishes. Callers
                    // only await a clone, so a cancelled caller (even the one
                    // that created the run) can never strand a completed run
                    // in the slot.
                    let this = Arc::clone(self);
                    let run: SharedRun = async move {
                        let outcome = this.run().await;
                        this.inflight.lock().await.take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *guard = Some(run.clone());
                    run
                }
            }
        };

        run.await
    }

    async fn run(&self) -> ReconcileOutcome {
        let started = Instant::now();
        self.event_bus.emit(CoreEvent::Sync(SyncEvent::ReconcileStarted)).ok();

        let (notif_result, bucket_result) = tokio::join!(
            self.remote.fetch_notifications(),
            self.remote.fetch_buckets()
        );
        let fetch_ms = started.elapsed().as_millis() as u64;

        let mut outcome = ReconcileOutcome {
            notifications_fetched: notif_result.is_ok(),
            buckets_fetched: bucket_result.is_ok(),
            fetch_ms,
            ..ReconcileOutcome::default()
        };

        if outcome.network_unavailable() {
            let message = format!(
                "notifications: {}; buckets: {}",
                notif_result.err().map(|e| e.to_string()).unwrap_or_default(),
                bucket_result.err().map(|e| e.to_string()).unwrap_or_default(),
            );
            warn!(message, "Reconciliation skipped, backend unreachable");
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::ReconcileFailed { message }))
                .ok();
            return outcome;
        }

        if let Ok(remote_notifications) = &notif_result {
            outcome.notifications_inserted = self.merge_notifications(remote_notifications).await;
            outcome.receipt_reported = self.report_receipt(remote_notifications).await;
        }

        let merge_started = Instant::now();
        let (bucket_rows, buckets_authoritative) = match &bucket_result {
            Ok(remote_buckets) => {
                let rows: Vec<Bucket> = remote_buckets.iter().map(Bucket::from_remote).collect();
                if let Err(e) = self.buckets.save_batch(&rows).await {
                    self.report_store_error("bucket save failed", &e);
                }
                (rows, true)
            }
            Err(e) => {
                debug!(error = %e, "Bucket fetch failed, using local buckets");
                let rows = self.buckets.find_all().await.unwrap_or_else(|e| {
                    self.report_store_error("local bucket read failed", &e);
                    Vec::new()
                });
                (rows, false)
            }
        };

        let stats = self.notifications.bucket_stats().await.unwrap_or_else(|e| {
            self.report_store_error("bucket stats query failed", &e);
            Vec::new()
        });
        let stats_by_id: HashMap<&str, _> =
            stats.iter().map(|s| (s.bucket_id.as_str(), s)).collect();

        let mut read_model: Vec<BucketWithStats> = bucket_rows
            .iter()
            .map(|b| BucketWithStats::from_bucket(b, stats_by_id.get(b.id.as_str()).copied()))
            .collect();
        let mut known: std::collections::HashSet<String> =
            bucket_rows.iter().map(|b| b.id.clone()).collect();

        // Local bucket rows an authoritative fetch no longer returned stay in
        // the read-model as orphans, keeping their last-known metadata.
        if buckets_authoritative {
            let local_rows = self.buckets.find_all().await.unwrap_or_else(|e| {
                self.report_store_error("local bucket read failed", &e);
                Vec::new()
            });
            for row in &local_rows {
                if known.insert(row.id.clone()) {
                    let mut entry = BucketWithStats::from_bucket(
                        row,
                        stats_by_id.get(row.id.as_str()).copied(),
                    );
                    entry.is_orphan = true;
                    read_model.push(entry);
                }
            }
        }

        // Bucket ids that exist only as foreign keys on local notifications.
        for row in &stats {
            if !known.contains(row.bucket_id.as_str()) {
                read_model.push(BucketWithStats::orphan(row));
            }
        }
        outcome.orphan_buckets = read_model.iter().filter(|b| b.is_orphan).count();

        sort_read_model(&mut read_model);
        outcome.buckets_published = read_model.len();
        outcome.merge_ms = merge_started.elapsed().as_millis() as u64;
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        self.read_model_tx.send_replace(read_model);
        info!(
            buckets = outcome.buckets_published,
            inserted = outcome.notifications_inserted,
            orphans = outcome.orphan_buckets,
            duration_ms = outcome.duration_ms,
            "Reconciliation completed"
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::ReconcileCompleted {
                buckets: outcome.buckets_published as u64,
                notifications_inserted: outcome.notifications_inserted,
                orphan_buckets: outcome.orphan_buckets as u64,
                duration_ms: outcome.duration_ms,
            }))
            .ok();

        outcome
    }

    /// Insert fetched notifications that are missing locally.
    async fn merge_notifications(
        &self,
        remote: &[bridge_traits::RemoteNotification],
    ) -> u64 {
        let rows: Vec<Notification> = remote
            .iter()
            .filter_map(|n| match Notification::from_remote(n) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(id = %n.id, error = %e, "Skipping undecodable notification");
                    None
                }
            })
            .collect();

        match self.notifications.insert_missing(&rows).await {
            Ok(inserted) => inserted,
            Err(e) => {
                self.report_store_error("notification merge failed", &e);
                0
            }
        }
    }

    /// Advance the received-up-to marker when the fetch saw something newer.
    /// Failures here never fail the run.
    async fn report_receipt(&self, remote: &[bridge_traits::RemoteNotification]) -> bool {
        let Some(newest) = remote.iter().map(|n| n.id.as_str()).max() else {
            return false;
        };

        let last = match self.sync_state.last_received_notification_id().await {
            Ok(last) => last,
            Err(e) => {
                self.report_store_error("receipt marker read failed", &e);
                return false;
            }
        };
        if last.as_deref() >= Some(newest) {
            return false;
        }

        if let Err(e) = self.remote.report_received_up_to(newest).await {
            debug!(error = %e, "Receipt report failed, will retry next run");
            return false;
        }
        if let Err(e) = self.sync_state.set_last_received_notification_id(newest).await {
            self.report_store_error("receipt marker write failed", &e);
        }
        true
    }

    fn report_store_error(&self, context: &str, error: &StoreError) {
        if error.is_corruption() {
            warn!(context, error = %error, "Store corruption during reconciliation");
            self.event_bus
                .emit(CoreEvent::Recovery(RecoveryEvent::CorruptionDetected {
                    source: "sync".to_string(),
                    message: error.to_string(),
                }))
                .ok();
        } else {
            warn!(context, error = %error, "Store error during reconciliation");
        }
    }
}
