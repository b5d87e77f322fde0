//! Read-model types for the bucket list

use core_store::models::{Bucket, BucketStatsRow};
use serde::{Deserialize, Serialize};

/// A bucket joined with its local notification aggregates, as published to
/// the UI.
///
/// Orphans are buckets the backend no longer returns but that still own
/// local notifications. They keep their stats and are flagged rather than
/// hidden, so the user can still reach those notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketWithStats {
    pub id: String,
    /// Backend name. `None` for orphans synthesized from notification
    /// foreign keys alone; orphans that still have a local bucket row keep
    /// their last-known name.
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub can_write: bool,
    pub can_admin: bool,
    pub snooze_until: Option<i64>,
    pub total_messages: i64,
    pub unread_count: i64,
    pub last_notification_at: Option<i64>,
    pub is_orphan: bool,
}

impl BucketWithStats {
    /// Join a known bucket with its aggregates. Buckets without any local
    /// notifications get zeroed stats.
    pub fn from_bucket(bucket: &Bucket, stats: Option<&BucketStatsRow>) -> Self {
        Self {
            id: bucket.id.clone(),
            name: Some(bucket.name.clone()),
            description: bucket.description.clone(),
            icon: bucket.icon.clone(),
            color: bucket.color.clone(),
            created_at: Some(bucket.created_at),
            updated_at: Some(bucket.updated_at),
            can_write: bucket.can_write,
            can_admin: bucket.can_admin,
            snooze_until: bucket.snooze_until,
            total_messages: stats.map_or(0, |s| s.total_messages),
            unread_count: stats.map_or(0, |s| s.unread_count),
            last_notification_at: stats.and_then(|s| s.last_notification_at),
            is_orphan: false,
        }
    }

    /// Synthesize an entry for a bucket that exists only as a foreign key on
    /// local notifications.
    pub fn orphan(stats: &BucketStatsRow) -> Self {
        Self {
            id: stats.bucket_id.clone(),
            name: None,
            description: None,
            icon: None,
            color: None,
            created_at: None,
            updated_at: None,
            can_write: false,
            can_admin: false,
            snooze_until: None,
            total_messages: stats.total_messages,
            unread_count: stats.unread_count,
            last_notification_at: stats.last_notification_at,
            is_orphan: true,
        }
    }

    /// Name for presentation. Orphans fall back to a truncated id, which is
    /// a display concern only and never feeds back into orphan detection.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let short: String = self.id.chars().take(8).collect();
                format!("Bucket {short}")
            }
        }
    }

    /// Whether the bucket is snoozed at `now` (Unix seconds).
    pub fn is_snoozed(&self, now: i64) -> bool {
        self.snooze_until.is_some_and(|until| until > now)
    }
}

/// Sort for the published bucket list: most unread first, then most recent
/// notification, then name.
pub fn sort_read_model(buckets: &mut [BucketWithStats]) {
    buckets.sort_by(|a, b| {
        b.unread_count
            .cmp(&a.unread_count)
            .then(b.last_notification_at.cmp(&a.last_notification_at))
            .then_with(|| a.display_name().cmp(&b.display_name()))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// What one reconciliation run did. Always produced, even when every network
/// call failed; the flags say which phases ran.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub notifications_fetched: bool,
    pub buckets_fetched: bool,
    pub notifications_inserted: u64,
    pub receipt_reported: bool,
    /// Entries in the published read-model, orphans included.
    pub buckets_published: usize,
    pub orphan_buckets: usize,
    pub fetch_ms: u64,
    pub merge_ms: u64,
    pub duration_ms: u64,
}

impl ReconcileOutcome {
    /// True when neither fetch succeeded and the run left everything alone.
    pub fn network_unavailable(&self) -> bool {
        !self.notifications_fetched && !self.buckets_fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: Option<&str>, unread: i64, last: Option<i64>) -> BucketWithStats {
        BucketWithStats {
            id: id.to_string(),
            name: name.map(str::to_string),
            description: None,
            icon: None,
            color: None,
            created_at: None,
            updated_at: None,
            can_write: false,
            can_admin: false,
            snooze_until: None,
            total_messages: unread,
            unread_count: unread,
            last_notification_at: last,
            is_orphan: name.is_none(),
        }
    }

    #[test]
    fn sort_puts_unread_first_then_recent_then_name() {
        let mut list = vec![
            entry("b1", Some("Zebra"), 0, Some(50)),
            entry("b2", Some("Alerts"), 0, Some(50)),
            entry("b3", Some("Quiet"), 0, Some(90)),
            entry("b4", Some("Busy"), 3, Some(10)),
        ];
        sort_read_model(&mut list);

        let ids: Vec<&str> = list.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b4", "b3", "b2", "b1"]);
    }

    #[test]
    fn orphan_display_name_truncates_id() {
        let stats = BucketStatsRow {
            bucket_id: "0123456789abcdef".to_string(),
            total_messages: 2,
            unread_count: 1,
            last_notification_at: Some(7),
        };
        let orphan = BucketWithStats::orphan(&stats);

        assert!(orphan.is_orphan);
        assert_eq!(orphan.display_name(), "Bucket 01234567");
        assert_eq!(orphan.total_messages, 2);
    }

    #[test]
    fn snooze_is_time_relative() {
        let mut b = entry("b1", Some("Builds"), 0, None);
        b.snooze_until = Some(100);
        assert!(b.is_snoozed(50));
        assert!(!b.is_snoozed(100));
        assert!(!b.is_snoozed(150));
    }
}
