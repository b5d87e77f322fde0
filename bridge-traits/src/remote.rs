//! Remote Data Source Abstraction
//!
//! The backend exposes a small query/mutation surface to this core: two read
//! operations (fetch notifications, fetch buckets) and one best-effort write
//! (report the highest notification id seen by this device). The transport and
//! schema codegen live outside the core; this trait is the typed contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A media attachment referenced by a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    /// Absolute URL of the asset
    pub url: String,
    /// Media type as reported by the backend ("IMAGE", "VIDEO", ...)
    pub media_type: String,
    /// Optional display name
    pub name: Option<String>,
}

/// A notification as returned by the backend.
///
/// Ids are opaque strings that the server issues in a monotonically
/// comparable order; `Ord` on the string is the receipt-marker ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNotification {
    pub id: String,
    pub bucket_id: String,
    pub title: String,
    pub body: Option<String>,
    /// Unix timestamp (seconds) when the notification was created server-side
    pub created_at: i64,
    /// Unix timestamp when the user read it, if ever
    pub read_at: Option<i64>,
    pub attachments: Vec<RemoteAttachment>,
}

/// A bucket as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBucket {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Whether this device may publish into the bucket
    pub can_write: bool,
    /// Whether this device may administer the bucket
    pub can_admin: bool,
    /// Unix timestamp until which the bucket is snoozed, if snoozed
    pub snooze_until: Option<i64>,
}

/// Backend query/mutation surface.
///
/// Fetches are network-only: no caching layer sits between this trait and the
/// transport, so every call reflects authoritative server state.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Fetch the notifications visible to this device.
    async fn fetch_notifications(&self) -> Result<Vec<RemoteNotification>>;

    /// Fetch the buckets visible to this device.
    async fn fetch_buckets(&self) -> Result<Vec<RemoteBucket>>;

    /// Report that every notification up to and including `notification_id`
    /// has been received by this device. Best-effort: callers log and
    /// continue on failure.
    async fn report_received_up_to(&self, notification_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_id_ordering_is_lexicographic() {
        // ULID-style ids issued later compare greater
        let older = "01H2X5Y000000000000000000A";
        let newer = "01H2X5Y000000000000000000B";
        assert!(newer > older);
    }

    #[test]
    fn remote_notification_round_trips_json() {
        let n = RemoteNotification {
            id: "n-1".to_string(),
            bucket_id: "b-1".to_string(),
            title: "Build finished".to_string(),
            body: None,
            created_at: 1_700_000_000,
            read_at: None,
            attachments: vec![RemoteAttachment {
                url: "https://cdn.example.com/a.png".to_string(),
                media_type: "IMAGE".to_string(),
                name: Some("a.png".to_string()),
            }],
        };

        let json = serde_json::to_string(&n).unwrap();
        let back: RemoteNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }
}
