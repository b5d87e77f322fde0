//! Sync bookkeeping repository
//!
//! Small key/value table for durable sync markers. The one key the core
//! writes today is the received-up-to notification id: the highest backend
//! notification id this device has confirmed receipt of. Backend ids are
//! issued in lexicographically increasing order, so plain string comparison
//! decides whether the marker needs advancing.

use crate::db::DurableDatabase;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Key under which the received-up-to notification id is stored.
pub const LAST_RECEIVED_NOTIFICATION_KEY: &str = "last_received_notification_id";

/// Sync state repository interface
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Read a marker value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a marker value, overwriting any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read the received-up-to notification id.
    async fn last_received_notification_id(&self) -> Result<Option<String>> {
        self.get(LAST_RECEIVED_NOTIFICATION_KEY).await
    }

    /// Advance the received-up-to notification id.
    async fn set_last_received_notification_id(&self, id: &str) -> Result<()> {
        self.set(LAST_RECEIVED_NOTIFICATION_KEY, id).await
    }
}

/// SQLite implementation of SyncStateRepository
pub struct SqliteSyncStateRepository {
    db: Arc<DurableDatabase>,
}

impl SqliteSyncStateRepository {
    /// Create a new SQLite sync state repository
    pub fn new(db: Arc<DurableDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let pool = self.db.pool().await;
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let pool = self.db.pool().await;
        sqlx::query(
            "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await?;

        Ok(())
    }
}
