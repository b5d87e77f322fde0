//! Record-change trigger classification
//!
//! The platform bridge reports record changes with a free-form `reason`.
//! Three classes matter:
//!
//! - `incremental_*` reasons are the echo of a sync that already updated the
//!   durable store; the only work left is invalidating derived read-models.
//!   They must never start another sync, or every sync would trigger the
//!   next one.
//! - push/subscription/remote-notification reasons signal an external change
//!   and start an incremental sync, deduplicated so a burst of pushes shares
//!   one run.
//! - everything else is ignored.

use bridge_traits::cloudkit::{CloudKitBridge, CloudKitEvent, RecordChangeEvent};
use core_runtime::events::{CoreEvent, EventBus, InvalidationScope, SyncEvent};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the trigger did with one record-change reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// The reason is not actionable.
    Ignored,
    /// Read-models were invalidated; no sync ran.
    Invalidated { scope: InvalidationScope },
    /// An incremental sync ran (or was joined) and succeeded.
    SyncCompleted { updated_count: u64 },
    /// An incremental sync ran (or was joined) and failed.
    SyncFailed { message: String },
}

enum Classification {
    InvalidateOnly(InvalidationScope),
    Sync,
    Ignore,
}

fn classify(reason: &str) -> Classification {
    if let Some(rest) = reason.strip_prefix("incremental_") {
        let scope = if rest.contains("notification") {
            InvalidationScope::Notifications
        } else if rest.contains("bucket") {
            InvalidationScope::Buckets
        } else {
            InvalidationScope::All
        };
        return Classification::InvalidateOnly(scope);
    }

    if reason.starts_with("push")
        || reason.starts_with("subscription")
        || reason.starts_with("remote_notification")
    {
        return Classification::Sync;
    }

    Classification::Ignore
}

type SharedSync = Shared<BoxFuture<'static, TriggerAction>>;

/// Turns record-change reasons into sync runs or invalidations.
pub struct SyncTrigger {
    bridge: Arc<dyn CloudKitBridge>,
    event_bus: Arc<EventBus>,
    inflight: Mutex<Option<SharedSync>>,
}

impl SyncTrigger {
    pub fn new(bridge: Arc<dyn CloudKitBridge>, event_bus: Arc<EventBus>) -> Self {
        Self {
            bridge,
            event_bus,
            inflight: Mutex::new(None),
        }
    }

    /// Handle one record-change reason.
    pub async fn handle(self: &Arc<Self>, reason: &str) -> TriggerAction {
        match classify(reason) {
            Classification::Ignore => {
                debug!(reason, "Ignoring record change");
                TriggerAction::Ignored
            }
            Classification::InvalidateOnly(scope) => {
                debug!(reason, ?scope, "Invalidating read-models");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::ReadModelInvalidated { scope }))
                    .ok();
                TriggerAction::Invalidated { scope }
            }
            Classification::Sync => self.run_incremental_sync(reason).await,
        }
    }

    /// Handle a record-change event from the bridge.
    pub async fn handle_record_change(self: &Arc<Self>, event: &RecordChangeEvent) -> TriggerAction {
        self.handle(&event.reason).await
    }

    /// Consume bridge events in the background, routing record changes into
    /// the trigger. Other event kinds are observability-only here.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let trigger = Arc::clone(self);
        let mut events = self.bridge.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CloudKitEvent::RecordChanged(change)) => {
                        trigger.handle_record_change(&change).await;
                    }
                    Ok(other) => debug!(?other, "Bridge event without trigger action"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Trigger fell behind on bridge events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Start an incremental sync, or join the one already running.
    async fn run_incremental_sync(self: &Arc<Self>, reason: &str) -> TriggerAction {
        let run = {
            let mut guard = self.inflight.lock().await;
            match guard.as_ref() {
                Some(run) => {
                    debug!(reason, "Joining in-flight incremental sync");
                    run.clone()
                }
                None => {
                    // The run clears its own slot on completion; see
                    // `NetworkReconciler::reconcile` for the cancellation
                    // rationale.
                    let this = Arc::clone(self);
                    let reason = reason.to_string();
                    let run: SharedSync = async move {
                        let action = this.execute_sync(&reason).await;
                        this.inflight.lock().await.take();
                        action
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

    async fn execute_sync(&self, reason: &str) -> TriggerAction {
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::IncrementalSyncStarted {
                reason: reason.to_string(),
            }))
            .ok();

        match self.bridge.sync_incremental(false).await {
            Ok(result) if result.success => {
                info!(reason, updated = result.updated_count, "Incremental sync completed");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::IncrementalSyncCompleted {
                        updated_count: result.updated_count,
                    }))
                    .ok();
                TriggerAction::SyncCompleted {
                    updated_count: result.updated_count,
                }
            }
            Ok(_) => {
                let message = "platform sync reported failure".to_string();
                warn!(reason, "Incremental sync reported failure");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::IncrementalSyncFailed {
                        message: message.clone(),
                    }))
                    .ok();
                TriggerAction::SyncFailed { message }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(reason, error = %message, "Incremental sync failed");
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::IncrementalSyncFailed {
                        message: message.clone(),
                    }))
                    .ok();
                TriggerAction::SyncFailed { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_reasons_invalidate_by_scope() {
        assert!(matches!(
            classify("incremental_notifications"),
            Classification::InvalidateOnly(InvalidationScope::Notifications)
        ));
        assert!(matches!(
            classify("incremental_buckets"),
            Classification::InvalidateOnly(InvalidationScope::Buckets)
        ));
        assert!(matches!(
            classify("incremental_full"),
            Classification::InvalidateOnly(InvalidationScope::All)
        ));
    }

    #[test]
    fn push_class_reasons_sync() {
        assert!(matches!(classify("push"), Classification::Sync));
        assert!(matches!(classify("subscription_fired"), Classification::Sync));
        assert!(matches!(
            classify("remote_notification"),
            Classification::Sync
        ));
    }

    #[test]
    fn unknown_reasons_are_ignored() {
        assert!(matches!(classify("schema_migrated"), Classification::Ignore));
        assert!(matches!(classify(""), Classification::Ignore));
    }
}
