//! Row types for the durable notification store.
//!
//! Timestamps are Unix epoch seconds stored as `INTEGER`. Attachments are
//! stored denormalized as a JSON array in `attachments_json`; they are only
//! ever read back as a whole, so a side table would buy nothing.

use crate::Result;
use bridge_traits::{RemoteAttachment, RemoteBucket, RemoteNotification};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A media attachment as persisted inside `attachments_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub url: String,
    pub media_type: String,
    pub name: Option<String>,
}

impl From<&RemoteAttachment> for AttachmentRecord {
    fn from(a: &RemoteAttachment) -> Self {
        Self {
            url: a.url.clone(),
            media_type: a.media_type.clone(),
            name: a.name.clone(),
        }
    }
}

/// A notification row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub bucket_id: String,
    pub title: String,
    pub body: Option<String>,
    pub created_at: i64,
    pub read_at: Option<i64>,
    pub attachments_json: String,
}

impl Notification {
    /// Decode the attachment list from its JSON column.
    pub fn attachments(&self) -> Result<Vec<AttachmentRecord>> {
        Ok(serde_json::from_str(&self.attachments_json)?)
    }

    /// Whether the user has read this notification.
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Build a row from a backend notification.
    pub fn from_remote(remote: &RemoteNotification) -> Result<Self> {
        let attachments: Vec<AttachmentRecord> =
            remote.attachments.iter().map(AttachmentRecord::from).collect();

        Ok(Self {
            id: remote.id.clone(),
            bucket_id: remote.bucket_id.clone(),
            title: remote.title.clone(),
            body: remote.body.clone(),
            created_at: remote.created_at,
            read_at: remote.read_at,
            attachments_json: serde_json::to_string(&attachments)?,
        })
    }
}

/// A bucket row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub can_write: bool,
    pub can_admin: bool,
    pub snooze_until: Option<i64>,
}

impl Bucket {
    /// Build a row from a backend bucket.
    pub fn from_remote(remote: &RemoteBucket) -> Self {
        Self {
            id: remote.id.clone(),
            name: remote.name.clone(),
            description: remote.description.clone(),
            icon: remote.icon.clone(),
            color: remote.color.clone(),
            created_at: remote.created_at,
            updated_at: remote.updated_at,
            can_write: remote.can_write,
            can_admin: remote.can_admin,
            snooze_until: remote.snooze_until,
        }
    }
}

/// Per-bucket aggregates computed over the notifications table.
///
/// Grouped by `bucket_id`, so buckets that exist only as a foreign key on
/// local notifications still get a row. That is what lets the reconciler
/// detect orphans.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BucketStatsRow {
    pub bucket_id: String,
    pub total_messages: i64,
    pub unread_count: i64,
    pub last_notification_at: Option<i64>,
}

/// A sync bookkeeping row (opaque key/value).
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SyncStateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_remote() -> RemoteNotification {
        RemoteNotification {
            id: "01H2X5Y0A".to_string(),
            bucket_id: "bucket-1".to_string(),
            title: "Deploy finished".to_string(),
            body: Some("production".to_string()),
            created_at: 1_700_000_000,
            read_at: None,
            attachments: vec![RemoteAttachment {
                url: "https://cdn.example.com/shot.png".to_string(),
                media_type: "IMAGE".to_string(),
                name: None,
            }],
        }
    }

    #[test]
    fn from_remote_encodes_attachments() {
        let row = Notification::from_remote(&sample_remote()).unwrap();
        assert_eq!(row.id, "01H2X5Y0A");
        assert!(!row.is_read());

        let attachments = row.attachments().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].media_type, "IMAGE");
    }

    #[test]
    fn empty_attachments_decode() {
        let row = Notification {
            id: "n".to_string(),
            bucket_id: "b".to_string(),
            title: "t".to_string(),
            body: None,
            created_at: 0,
            read_at: Some(5),
            attachments_json: "[]".to_string(),
        };

        assert!(row.is_read());
        assert!(row.attachments().unwrap().is_empty());
    }

    #[test]
    fn bucket_from_remote_copies_permissions() {
        let remote = RemoteBucket {
            id: "b-1".to_string(),
            name: "Builds".to_string(),
            description: None,
            icon: None,
            color: Some("#ff0000".to_string()),
            created_at: 1,
            updated_at: 2,
            can_write: true,
            can_admin: false,
            snooze_until: None,
        };

        let row = Bucket::from_remote(&remote);
        assert!(row.can_write);
        assert!(!row.can_admin);
        assert_eq!(row.color.as_deref(), Some("#ff0000"));
    }
}
