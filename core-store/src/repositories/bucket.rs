//! Bucket repository trait and implementation

use crate::db::DurableDatabase;
use crate::models::Bucket;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Bucket repository interface for data access operations
#[async_trait]
pub trait BucketRepository: Send + Sync {
    /// Find a bucket by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Bucket>>;

    /// Get all buckets
    async fn find_all(&self) -> Result<Vec<Bucket>>;

    /// Insert or replace buckets wholesale.
    ///
    /// Bucket rows mirror the backend; the freshest server copy always wins.
    async fn save_batch(&self, buckets: &[Bucket]) -> Result<()>;

    /// Delete all buckets
    async fn delete_all(&self) -> Result<()>;

    /// Count total buckets
    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of BucketRepository
pub struct SqliteBucketRepository {
    db: Arc<DurableDatabase>,
}

impl SqliteBucketRepository {
    /// Create a new SQLite bucket repository
    pub fn new(db: Arc<DurableDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BucketRepository for SqliteBucketRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Bucket>> {
        let pool = self.db.pool().await;
        let bucket = sqlx::query_as::<_, Bucket>("SELECT * FROM buckets WHERE id = ?")
            .bind(id)
            .fetch_optional(&pool)
            .await?;

        Ok(bucket)
    }

    async fn find_all(&self) -> Result<Vec<Bucket>> {
        let pool = self.db.pool().await;
        let buckets = sqlx::query_as::<_, Bucket>("SELECT * FROM buckets ORDER BY name, id")
            .fetch_all(&pool)
            .await?;

        Ok(buckets)
    }

    async fn save_batch(&self, buckets: &[Bucket]) -> Result<()> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        for b in buckets {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO buckets
                    (id, name, description, icon, color, created_at, updated_at,
                     can_write, can_admin, snooze_until)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&b.id)
            .bind(&b.name)
            .bind(&b.description)
            .bind(&b.icon)
            .bind(&b.color)
            .bind(b.created_at)
            .bind(b.updated_at)
            .bind(b.can_write)
            .bind(b.can_admin)
            .bind(b.snooze_until)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM buckets").execute(&pool).await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let pool = self.db.pool().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM buckets")
            .fetch_one(&pool)
            .await?;

        Ok(count.0)
    }
}
