//! Corruption classification against real damaged database files.

use core_store::db::{DatabaseConfig, DurableDatabase};

#[tokio::test]
async fn opening_garbage_file_is_classified_as_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.db");
    std::fs::write(&path, b"this is definitely not a sqlite file").unwrap();

    let err = DurableDatabase::open(DatabaseConfig::new(&path))
        .await
        .expect_err("garbage file must not open cleanly");

    assert!(
        err.is_corruption(),
        "expected corruption classification, got: {err:?}"
    );
}

#[tokio::test]
async fn reset_recovers_a_garbage_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.db");
    std::fs::write(&path, b"garbage").unwrap();

    // Open fails, but a fresh handle can be built after deleting the files,
    // which is exactly what the recovery reset does.
    assert!(DurableDatabase::open(DatabaseConfig::new(&path))
        .await
        .is_err());

    std::fs::remove_file(&path).unwrap();

    let db = DurableDatabase::open(DatabaseConfig::new(&path))
        .await
        .expect("fresh database should open");

    let pool = db.pool().await;
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, 0);
}
