//! Notification repository trait and implementation

use crate::db::DurableDatabase;
use crate::models::{BucketStatsRow, Notification};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Notification repository interface for data access operations
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Find a notification by its ID
    ///
    /// # Returns
    /// - `Ok(Some(notification))` if found
    /// - `Ok(None)` if not found
    /// - `Err` if database error occurs
    async fn find_by_id(&self, id: &str) -> Result<Option<Notification>>;

    /// Get all notifications ordered by creation time, newest first
    async fn find_all(&self) -> Result<Vec<Notification>>;

    /// Get all notifications in a bucket, newest first
    async fn find_by_bucket(&self, bucket_id: &str) -> Result<Vec<Notification>>;

    /// Insert notifications that are not present yet.
    ///
    /// Existing rows are left untouched: local read state and edits always
    /// win over refetched content.
    ///
    /// # Returns
    /// Number of rows actually inserted
    async fn insert_missing(&self, notifications: &[Notification]) -> Result<u64>;

    /// Insert or replace notifications wholesale.
    ///
    /// Used when the backend copy is authoritative (recovery refetch).
    async fn upsert_batch(&self, notifications: &[Notification]) -> Result<()>;

    /// Delete all notifications
    async fn delete_all(&self) -> Result<()>;

    /// Count total notifications
    async fn count(&self) -> Result<i64>;

    /// Per-bucket aggregates over the notifications table.
    ///
    /// Grouped by `bucket_id` regardless of whether a bucket row exists, so
    /// the caller can detect buckets that survive only through their
    /// notifications.
    async fn bucket_stats(&self) -> Result<Vec<BucketStatsRow>>;
}

/// SQLite implementation of NotificationRepository
pub struct SqliteNotificationRepository {
    db: Arc<DurableDatabase>,
}

impl SqliteNotificationRepository {
    /// Create a new SQLite notification repository
    pub fn new(db: Arc<DurableDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Notification>> {
        let pool = self.db.pool().await;
        let notification =
            sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = ?")
                .bind(id)
                .fetch_optional(&pool)
                .await?;

        Ok(notification)
    }

    async fn find_all(&self) -> Result<Vec<Notification>> {
        let pool = self.db.pool().await;
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&pool)
        .await?;

        Ok(notifications)
    }

    async fn find_by_bucket(&self, bucket_id: &str) -> Result<Vec<Notification>> {
        let pool = self.db.pool().await;
        let notifications = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE bucket_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(bucket_id)
        .fetch_all(&pool)
        .await?;

        Ok(notifications)
    }

    async fn insert_missing(&self, notifications: &[Notification]) -> Result<u64> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;
        let mut inserted = 0u64;

        for n in notifications {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO notifications
                    (id, bucket_id, title, body, created_at, read_at, attachments_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&n.id)
            .bind(&n.bucket_id)
            .bind(&n.title)
            .bind(&n.body)
            .bind(n.created_at)
            .bind(n.read_at)
            .bind(&n.attachments_json)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!(
            offered = notifications.len(),
            inserted, "Inserted missing notifications"
        );
        Ok(inserted)
    }

    async fn upsert_batch(&self, notifications: &[Notification]) -> Result<()> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        for n in notifications {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO notifications
                    (id, bucket_id, title, body, created_at, read_at, attachments_json)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&n.id)
            .bind(&n.bucket_id)
            .bind(&n.title)
            .bind(&n.body)
            .bind(n.created_at)
            .bind(n.read_at)
            .bind(&n.attachments_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM notifications").execute(&pool).await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let pool = self.db.pool().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
            .fetch_one(&pool)
            .await?;

        Ok(count.0)
    }

    async fn bucket_stats(&self) -> Result<Vec<BucketStatsRow>> {
        let pool = self.db.pool().await;
        let stats = sqlx::query_as::<_, BucketStatsRow>(
            r#"
            SELECT
                bucket_id,
                COUNT(*) AS total_messages,
                SUM(CASE WHEN read_at IS NULL THEN 1 ELSE 0 END) AS unread_count,
                MAX(created_at) AS last_notification_at
            FROM notifications
            GROUP BY bucket_id
            "#,
        )
        .fetch_all(&pool)
        .await?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, DurableDatabase};

    async fn test_repo() -> SqliteNotificationRepository {
        let db = DurableDatabase::open(DatabaseConfig::in_memory())
            .await
            .unwrap();
        SqliteNotificationRepository::new(Arc::new(db))
    }

    fn notification(id: &str, bucket: &str, created_at: i64, read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            bucket_id: bucket.to_string(),
            title: format!("title {}", id),
            body: None,
            created_at,
            read_at: if read { Some(created_at + 1) } else { None },
            attachments_json: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_missing_skips_existing_rows() {
        let repo = test_repo().await;

        let original = notification("n1", "b1", 100, true);
        let inserted = repo.insert_missing(&[original.clone()]).await.unwrap();
        assert_eq!(inserted, 1);

        // A refetched copy of n1 with different content must not overwrite
        let mut refetched = notification("n1", "b1", 100, false);
        refetched.title = "replaced title".to_string();
        let inserted = repo
            .insert_missing(&[refetched, notification("n2", "b1", 200, false)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let kept = repo.find_by_id("n1").await.unwrap().unwrap();
        assert_eq!(kept.title, original.title);
        assert!(kept.is_read());
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_batch_replaces_rows() {
        let repo = test_repo().await;
        repo.insert_missing(&[notification("n1", "b1", 100, true)])
            .await
            .unwrap();

        let mut replacement = notification("n1", "b1", 100, false);
        replacement.title = "authoritative".to_string();
        repo.upsert_batch(&[replacement]).await.unwrap();

        let row = repo.find_by_id("n1").await.unwrap().unwrap();
        assert_eq!(row.title, "authoritative");
        assert!(!row.is_read());
    }

    #[tokio::test]
    async fn find_all_orders_newest_first() {
        let repo = test_repo().await;
        repo.insert_missing(&[
            notification("n1", "b1", 100, false),
            notification("n2", "b1", 300, false),
            notification("n3", "b2", 200, false),
        ])
        .await
        .unwrap();

        let all = repo.find_all().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n3", "n1"]);
    }

    #[tokio::test]
    async fn bucket_stats_aggregate_per_bucket() {
        let repo = test_repo().await;
        repo.insert_missing(&[
            notification("n1", "b1", 100, true),
            notification("n2", "b1", 300, false),
            notification("n3", "b2", 200, false),
        ])
        .await
        .unwrap();

        let mut stats = repo.bucket_stats().await.unwrap();
        stats.sort_by(|a, b| a.bucket_id.cmp(&b.bucket_id));

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].bucket_id, "b1");
        assert_eq!(stats[0].total_messages, 2);
        assert_eq!(stats[0].unread_count, 1);
        assert_eq!(stats[0].last_notification_at, Some(300));
        assert_eq!(stats[1].bucket_id, "b2");
        assert_eq!(stats[1].unread_count, 1);
    }

    #[tokio::test]
    async fn delete_all_empties_table() {
        let repo = test_repo().await;
        repo.insert_missing(&[notification("n1", "b1", 100, false)])
            .await
            .unwrap();

        repo.delete_all().await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
