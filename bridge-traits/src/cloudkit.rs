//! Platform Sync Bridge Abstraction
//!
//! The native CloudKit (or equivalent) module pushes record-change events into
//! the core and exposes two imperative operations: an incremental sync and a
//! full notification fetch used by recovery. The core never talks to the
//! platform sync store directly; everything crosses this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::remote::RemoteNotification;

/// A record-change event from the platform sync store.
///
/// `reason` is the event taxonomy the trigger logic classifies on:
/// - reasons prefixed `incremental_` are the *output* of a prior incremental
///   sync (the durable store is already updated; only read-models need
///   invalidation)
/// - push/subscription/remote-notification class reasons indicate a genuine
///   externally-pushed change and may trigger a new incremental sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChangeEvent {
    pub record_type: String,
    pub record_id: String,
    pub reason: String,
    /// Raw record payload when the platform ships it with the event
    pub record_data: Option<serde_json::Value>,
}

/// Progress report emitted while the platform bridge syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgressEvent {
    pub step: String,
    pub current_item: u64,
    pub total_items: u64,
    pub item_type: String,
    pub phase: String,
}

/// Events emitted by the platform sync bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum CloudKitEvent {
    /// A record changed in the platform sync store
    RecordChanged(RecordChangeEvent),
    /// A single notification was updated
    NotificationUpdated { notification_id: String },
    /// A single notification was deleted
    NotificationDeleted { notification_id: String },
    /// A batch of notifications was updated
    NotificationsBatchUpdated { notification_ids: Vec<String> },
    /// A batch of notifications was deleted
    NotificationsBatchDeleted { notification_ids: Vec<String> },
    /// Sync progress report
    SyncProgress(SyncProgressEvent),
}

/// Result of an incremental sync through the platform bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalSyncResult {
    pub success: bool,
    pub updated_count: u64,
}

/// Result of a full notification fetch through the platform bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAllResult {
    pub success: bool,
    pub notifications: Vec<RemoteNotification>,
}

/// Platform sync bridge trait.
///
/// Implementations wrap the native sync module (CloudKit on Apple platforms).
/// Event delivery uses a broadcast channel so multiple core components can
/// subscribe independently.
#[async_trait]
pub trait CloudKitBridge: Send + Sync {
    /// Subscribe to sync events. Each call returns an independent receiver.
    fn subscribe(&self) -> broadcast::Receiver<CloudKitEvent>;

    /// Run an incremental sync against the platform store, or a full resync
    /// when `full_resync` is true.
    async fn sync_incremental(&self, full_resync: bool) -> Result<IncrementalSyncResult>;

    /// Fetch every notification known to the platform store. Used by recovery
    /// to re-hydrate notification content without touching bucket structure.
    async fn fetch_all_notifications(&self) -> Result<FetchAllResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_change_event_round_trips_json() {
        let event = CloudKitEvent::RecordChanged(RecordChangeEvent {
            record_type: "Notification".to_string(),
            record_id: "rec-1".to_string(),
            reason: "push".to_string(),
            record_data: Some(serde_json::json!({"title": "hi"})),
        });

        let json = serde_json::to_string(&event).unwrap();
        let back: CloudKitEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn batch_events_carry_all_ids() {
        let event = CloudKitEvent::NotificationsBatchDeleted {
            notification_ids: vec!["a".to_string(), "b".to_string()],
        };
        match event {
            CloudKitEvent::NotificationsBatchDeleted { notification_ids } => {
                assert_eq!(notification_ids.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }
}
