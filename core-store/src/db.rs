//! # Database Connection Pool Module
//!
//! Provides SQLite connection pooling with optimal configuration for the
//! notification store.
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for better concurrency (multiple readers, one writer)
//! - **Connection Pooling**: Configurable min/max connections with timeouts
//! - **Statement Caching**: Automatic prepared statement caching
//! - **Foreign Keys**: Enforced for referential integrity
//! - **Automatic Migrations**: Runs on initialization
//! - **Health Checks**: Connection validation
//! - **Swappable Handle**: [`DurableDatabase`] lets recovery close, replace,
//!   and reopen the underlying pool while repositories stay alive
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_store::db::{DatabaseConfig, DurableDatabase};
//!
//! let config = DatabaseConfig::new("notifications.db");
//! let db = DurableDatabase::open(config).await?;
//!
//! let pool = db.pool().await;
//! let row = sqlx::query("SELECT COUNT(*) FROM notifications")
//!     .fetch_one(&pool)
//!     .await?;
//! ```
//!
//! ## Testing
//!
//! For tests, use in-memory databases:
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::models::{Bucket, Notification, SyncStateEntry};
use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path or `:memory:` for in-memory database
    pub database_url: String,

    /// File path when backed by a file (None for in-memory)
    pub database_path: Option<PathBuf>,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Enable statement caching (number of statements to cache)
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Create a new database configuration with the given file path
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            database_path: Some(path),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            idle_timeout: Some(Duration::from_secs(600)),  // 10 minutes
            statement_cache_capacity: 100,
        }
    }

    /// Create a configuration for an in-memory database (useful for testing)
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_path: None,
            min_connections: 1,
            // Single connection: each SQLite in-memory connection is its own
            // database, so a larger pool would scatter tables across them.
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    /// Set the minimum number of connections
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool
///
/// This function:
/// 1. Configures SQLite connection options (WAL mode, foreign keys, etc.)
/// 2. Creates a connection pool with the specified configuration
/// 3. Runs database migrations
/// 4. Performs a health check
///
/// # Errors
///
/// Returns an error if:
/// - The database file cannot be accessed
/// - Connection pool creation fails
/// - Migrations fail
/// - Health check fails
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    // Parse the database URL and configure SQLite options
    let mut connect_options =
        SqliteConnectOptions::from_str(&config.database_url).map_err(StoreError::from)?;

    // Configure SQLite connection options
    connect_options = connect_options
        // Enable WAL mode for better concurrency
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL synchronous mode for good balance of safety and speed
        .synchronous(SqliteSynchronous::Normal)
        // Enable foreign key constraints
        .foreign_keys(true)
        // Create database if it doesn't exist
        .create_if_missing(true)
        // Optimize cache size (64MB)
        .pragma("cache_size", "-64000")
        // Incremental auto-vacuum to prevent fragmentation
        .pragma("auto_vacuum", "INCREMENTAL")
        // Statement cache capacity
        .statement_cache_capacity(config.statement_cache_capacity);

    debug!("SQLite connection options configured");

    // Create the connection pool
    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            StoreError::from(e)
        })?;

    info!(
        connections = pool.size(),
        "Database connection pool created successfully"
    );

    // Run migrations
    run_migrations(&pool).await?;

    // Perform health check
    health_check(&pool).await?;

    Ok(pool)
}

/// Create a connection pool for testing with in-memory database
///
/// This is a convenience function that creates an in-memory database
/// with migrations already applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    let config = DatabaseConfig::in_memory();
    create_pool(config).await
}

/// Run database migrations
///
/// This function applies all pending migrations from the `migrations/`
/// directory. Migrations are embedded in the binary at compile time using
/// `sqlx::migrate!()`.
async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            // A damaged file usually fails here first; keep the corruption
            // classification instead of folding it into a migration error.
            match e {
                sqlx::migrate::MigrateError::Execute(db_err) => StoreError::from(db_err),
                other => StoreError::Migration(other.to_string()),
            }
        })?;

    info!("Database migrations completed successfully");
    Ok(())
}

/// Perform a health check on the connection pool
///
/// This executes a simple query to verify the database is accessible
/// and the pool is functioning correctly.
async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Performing database health check");

    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        StoreError::from(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}

/// Logical dump of the entire store, used by recovery to carry content across
/// a destructive database reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseDump {
    pub notifications: Vec<Notification>,
    pub buckets: Vec<Bucket>,
    pub sync_state: Vec<SyncStateEntry>,
}

impl DatabaseDump {
    /// Total number of rows in the dump.
    pub fn row_count(&self) -> usize {
        self.notifications.len() + self.buckets.len() + self.sync_state.len()
    }
}

/// A connection pool handle whose underlying pool can be swapped.
///
/// Repositories hold an `Arc<DurableDatabase>` and fetch the current pool per
/// operation. Recovery can then close the pool, delete or replace the files
/// on disk, and reopen, without invalidating any repository handle.
pub struct DurableDatabase {
    config: DatabaseConfig,
    pool: RwLock<SqlitePool>,
}

impl DurableDatabase {
    /// Open the database described by `config`, running migrations.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config.clone()).await?;
        Ok(Self {
            config: config.clone(),
            pool: RwLock::new(pool),
        })
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get a clone of the current pool.
    ///
    /// Pools are cheap reference-counted handles; cloning per operation keeps
    /// the window where the swap lock is held to a minimum.
    pub async fn pool(&self) -> SqlitePool {
        self.pool.read().await.clone()
    }

    /// Close the current pool and open a fresh one against the same files.
    pub async fn reopen(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        guard.close().await;
        *guard = create_pool(self.config.clone()).await?;
        info!("Database pool reopened");
        Ok(())
    }

    /// Close the pool, delete the database files, and reopen a fresh empty
    /// database with the schema applied.
    ///
    /// This is the destructive last resort of recovery: all durable content
    /// is lost. In-memory databases are reset by reopening alone.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        guard.close().await;

        for file in self.database_files() {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => debug!(path = ?file, "Deleted database file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?file, error = %e, "Failed to delete database file");
                    return Err(StoreError::Io(e));
                }
            }
        }

        *guard = create_pool(self.config.clone()).await?;
        info!("Database reset to empty schema");
        Ok(())
    }

    /// Paths of the files backing this database (main file plus WAL
    /// sidecars). Empty for in-memory databases.
    pub fn database_files(&self) -> Vec<PathBuf> {
        let Some(path) = &self.config.database_path else {
            return Vec::new();
        };

        let mut files = vec![path.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut os = path.clone().into_os_string();
            os.push(suffix);
            files.push(PathBuf::from(os));
        }
        files
    }

    /// Read every row in the store into a logical dump.
    pub async fn export_dump(&self) -> Result<DatabaseDump> {
        let pool = self.pool().await;

        let notifications =
            sqlx::query_as::<_, Notification>("SELECT * FROM notifications ORDER BY id")
                .fetch_all(&pool)
                .await?;

        let buckets = sqlx::query_as::<_, Bucket>("SELECT * FROM buckets ORDER BY id")
            .fetch_all(&pool)
            .await?;

        let sync_state =
            sqlx::query_as::<_, SyncStateEntry>("SELECT * FROM sync_state ORDER BY key")
                .fetch_all(&pool)
                .await?;

        debug!(
            notifications = notifications.len(),
            buckets = buckets.len(),
            sync_state = sync_state.len(),
            "Exported logical dump"
        );

        Ok(DatabaseDump {
            notifications,
            buckets,
            sync_state,
        })
    }

    /// Write a logical dump back into the store.
    ///
    /// Rows are upserted so importing into a non-empty database keeps the
    /// newest copy of each row.
    pub async fn import_dump(&self, dump: &DatabaseDump) -> Result<()> {
        let pool = self.pool().await;
        let mut tx = pool.begin().await?;

        for n in &dump.notifications {
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

        for b in &dump.buckets {
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

        for entry in &dump.sync_state {
            sqlx::query(
                "INSERT OR REPLACE INTO sync_state (key, value, updated_at) VALUES (?, ?, ?)",
            )
            .bind(&entry.key)
            .bind(&entry.value)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(rows = dump.row_count(), "Imported logical dump");
        Ok(())
    }

    /// Close the pool. Further operations fail until `reopen()`.
    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }
}

impl std::fmt::Debug for DurableDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableDatabase")
            .field("database_url", &self.config.database_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_in_memory_pool() {
        let config = DatabaseConfig::in_memory();
        let pool = create_pool(config).await;
        assert!(pool.is_ok(), "Should create in-memory pool successfully");
    }

    #[tokio::test]
    async fn test_create_test_pool() {
        let pool = create_test_pool().await;
        assert!(pool.is_ok(), "Should create test pool successfully");
    }

    #[tokio::test]
    async fn test_health_check() {
        let pool = create_test_pool().await.unwrap();
        let result = health_check(&pool).await;
        assert!(result.is_ok(), "Health check should pass");
    }

    #[tokio::test]
    async fn test_database_config_builder() {
        let config = DatabaseConfig::in_memory()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60))
            .statement_cache_capacity(200);

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.statement_cache_capacity, 200);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ["notifications", "buckets", "sync_state"] {
            let result: (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_durable_database_pool_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("store.db"));
        let db = DurableDatabase::open(config).await.unwrap();

        let pool = db.pool().await;
        sqlx::query("INSERT INTO sync_state (key, value, updated_at) VALUES ('k', 'v', 0)")
            .execute(&pool)
            .await
            .unwrap();

        db.reopen().await.unwrap();

        let pool = db.pool().await;
        let row: (String,) = sqlx::query_as("SELECT value FROM sync_state WHERE key = 'k'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, "v");
    }

    #[tokio::test]
    async fn test_reset_drops_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("store.db"));
        let db = DurableDatabase::open(config).await.unwrap();

        let pool = db.pool().await;
        sqlx::query("INSERT INTO sync_state (key, value, updated_at) VALUES ('k', 'v', 0)")
            .execute(&pool)
            .await
            .unwrap();

        db.reset().await.unwrap();

        let pool = db.pool().await;
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_state")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_dump_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("store.db"));
        let db = DurableDatabase::open(config).await.unwrap();

        let pool = db.pool().await;
        sqlx::query(
            "INSERT INTO notifications (id, bucket_id, title, created_at) VALUES ('n1', 'b1', 'hello', 100)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO buckets (id, name, created_at, updated_at) VALUES ('b1', 'Builds', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let dump = db.export_dump().await.unwrap();
        assert_eq!(dump.notifications.len(), 1);
        assert_eq!(dump.buckets.len(), 1);

        db.reset().await.unwrap();
        db.import_dump(&dump).await.unwrap();

        let restored = db.export_dump().await.unwrap();
        assert_eq!(restored.notifications.len(), 1);
        assert_eq!(restored.buckets[0].name, "Builds");
    }

    #[tokio::test]
    async fn test_database_files_include_wal_sidecars() {
        let config = DatabaseConfig::new("/data/store.db");
        let db = DurableDatabase {
            config,
            pool: RwLock::new(SqlitePool::connect_lazy("sqlite::memory:").unwrap()),
        };

        let files = db.database_files();
        assert_eq!(files.len(), 3);
        assert!(files[1].to_string_lossy().ends_with("store.db-wal"));
        assert!(files[2].to_string_lossy().ends_with("store.db-shm"));
    }
}
