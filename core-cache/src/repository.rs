//! Cache metadata persistence
//!
//! The metadata table lives next to the notification tables but is owned by
//! this crate: the cache is an optional feature, so its schema is created on
//! initialization rather than through the core migrations.

use crate::error::Result;
use crate::models::{CacheItem, CacheKey, MediaType};
use async_trait::async_trait;
use core_store::db::DurableDatabase;
use std::sync::Arc;

/// Persistence interface for cache metadata.
#[async_trait]
pub trait CacheMetadataRepository: Send + Sync {
    /// Create the metadata table if it does not exist yet.
    async fn initialize(&self) -> Result<()>;

    /// Load every persisted item.
    async fn find_all(&self) -> Result<Vec<CacheItem>>;

    /// Insert or replace one item.
    async fn upsert(&self, item: &CacheItem) -> Result<()>;

    /// Remove one item.
    async fn delete(&self, key: &CacheKey) -> Result<()>;

    /// Remove everything.
    async fn delete_all(&self) -> Result<()>;
}

/// SQLite implementation of CacheMetadataRepository
pub struct SqliteCacheMetadataRepository {
    db: Arc<DurableDatabase>,
}

impl SqliteCacheMetadataRepository {
    /// Create a new SQLite cache metadata repository
    pub fn new(db: Arc<DurableDatabase>) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    url: String,
    media_type: String,
    local_path: Option<String>,
    size_bytes: i64,
    is_downloading: bool,
    is_permanent_failure: bool,
    is_user_deleted: bool,
    downloaded_at: Option<i64>,
    notification_date: Option<i64>,
    last_error: Option<String>,
}

impl CacheRow {
    fn into_item(self) -> Option<CacheItem> {
        // Rows with an unknown media type label are skipped rather than
        // failing the whole load.
        let media_type = MediaType::from_label(&self.media_type)?;
        Some(CacheItem {
            key: CacheKey::new(self.url, media_type),
            local_path: self.local_path,
            size_bytes: self.size_bytes.max(0) as u64,
            is_downloading: self.is_downloading,
            is_permanent_failure: self.is_permanent_failure,
            is_user_deleted: self.is_user_deleted,
            downloaded_at: self.downloaded_at,
            notification_date: self.notification_date,
            last_error: self.last_error,
        })
    }
}

#[async_trait]
impl CacheMetadataRepository for SqliteCacheMetadataRepository {
    async fn initialize(&self) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_metadata (
                url TEXT NOT NULL,
                media_type TEXT NOT NULL,
                local_path TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                is_downloading INTEGER NOT NULL DEFAULT 0,
                is_permanent_failure INTEGER NOT NULL DEFAULT 0,
                is_user_deleted INTEGER NOT NULL DEFAULT 0,
                downloaded_at INTEGER,
                notification_date INTEGER,
                last_error TEXT,
                PRIMARY KEY (url, media_type)
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(core_store::StoreError::from)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_metadata_type
             ON cache_metadata(media_type, notification_date DESC)",
        )
        .execute(&pool)
        .await
        .map_err(core_store::StoreError::from)?;

        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<CacheItem>> {
        let pool = self.db.pool().await;
        let rows = sqlx::query_as::<_, CacheRow>("SELECT * FROM cache_metadata")
            .fetch_all(&pool)
            .await
            .map_err(core_store::StoreError::from)?;

        Ok(rows.into_iter().filter_map(CacheRow::into_item).collect())
    }

    async fn upsert(&self, item: &CacheItem) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_metadata
                (url, media_type, local_path, size_bytes, is_downloading,
                 is_permanent_failure, is_user_deleted, downloaded_at,
                 notification_date, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.key.url)
        .bind(item.key.media_type.as_str())
        .bind(&item.local_path)
        .bind(item.size_bytes as i64)
        .bind(item.is_downloading)
        .bind(item.is_permanent_failure)
        .bind(item.is_user_deleted)
        .bind(item.downloaded_at)
        .bind(item.notification_date)
        .bind(&item.last_error)
        .execute(&pool)
        .await
        .map_err(core_store::StoreError::from)?;

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM cache_metadata WHERE url = ? AND media_type = ?")
            .bind(&key.url)
            .bind(key.media_type.as_str())
            .execute(&pool)
            .await
            .map_err(core_store::StoreError::from)?;

        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM cache_metadata")
            .execute(&pool)
            .await
            .map_err(core_store::StoreError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_store::db::DatabaseConfig;
    use std::path::PathBuf;

    async fn test_repo() -> SqliteCacheMetadataRepository {
        let db = DurableDatabase::open(DatabaseConfig::in_memory())
            .await
            .unwrap();
        let repo = SqliteCacheMetadataRepository::new(Arc::new(db));
        repo.initialize().await.unwrap();
        repo
    }

    fn cached_item(url: &str) -> CacheItem {
        let mut item = CacheItem::new(CacheKey::new(url, MediaType::Image));
        item.mark_cached(PathBuf::from("/tmp/a.jpg"), 42, 1_700_000_000, Some(5));
        item
    }

    #[tokio::test]
    async fn upsert_then_find_all_round_trips() {
        let repo = test_repo().await;
        let item = cached_item("https://example.com/a.jpg");
        repo.upsert(&item).await.unwrap();

        let all = repo.find_all().await.unwrap();
        assert_eq!(all, vec![item]);
    }

    #[tokio::test]
    async fn same_url_different_type_are_distinct_rows() {
        let repo = test_repo().await;
        let image = cached_item("https://example.com/a.jpg");
        let mut icon = image.clone();
        icon.key.media_type = MediaType::Icon;

        repo.upsert(&image).await.unwrap();
        repo.upsert(&icon).await.unwrap();
        assert_eq!(repo.find_all().await.unwrap().len(), 2);

        repo.delete(&icon.key).await.unwrap();
        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key.media_type, MediaType::Image);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let repo = test_repo().await;
        let mut item = cached_item("https://example.com/a.jpg");
        repo.upsert(&item).await.unwrap();

        item.mark_user_deleted();
        repo.upsert(&item).await.unwrap();

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_user_deleted);
    }

    #[tokio::test]
    async fn delete_all_empties_table() {
        let repo = test_repo().await;
        repo.upsert(&cached_item("https://example.com/a.jpg"))
            .await
            .unwrap();
        repo.delete_all().await.unwrap();
        assert!(repo.find_all().await.unwrap().is_empty());
    }
}
