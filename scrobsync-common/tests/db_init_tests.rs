//! Tests for database initialization on disk

use scrobsync_common::db::init::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sub").join("scrobsync.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("scrobsync.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO users (login_name) VALUES ('alice')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    // Second open keeps existing rows
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_listen_key_is_unique() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("scrobsync.db")).await.unwrap();

    sqlx::query("INSERT INTO users (login_name) VALUES ('alice')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO tracks (title) VALUES ('song')")
        .execute(&pool)
        .await
        .unwrap();

    let insert = "INSERT INTO listens (user_id, track_id, scrobbler, listened_at) VALUES (1, 1, 0, 1000)";
    sqlx::query(insert).execute(&pool).await.unwrap();
    assert!(sqlx::query(insert).execute(&pool).await.is_err());
}

#[tokio::test]
async fn test_foreign_keys_enforced_on_pooled_connections() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("scrobsync.db")).await.unwrap();

    // No user 99 / track 99
    let result = sqlx::query(
        "INSERT INTO listens (user_id, track_id, scrobbler, listened_at) VALUES (99, 99, 0, 1000)",
    )
    .execute(&pool)
    .await;

    assert!(result.is_err());
}
