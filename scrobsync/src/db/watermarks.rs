//! Backfill sync watermarks
//!
//! The watermark is the newest remote timestamp fully imported for a
//! (user, service) pair. It only moves after a whole page has been stored,
//! so an interrupted cycle resumes from the last complete page.

use chrono::{DateTime, Utc};
use scrobsync_common::db::{ScrobblerKind, UserId};
use scrobsync_common::time::{from_unix_seconds, to_unix_seconds};
use scrobsync_common::Result;
use sqlx::SqlitePool;

pub async fn load_watermark(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<i64> = sqlx::query_scalar(
        "SELECT watermark_ts FROM sync_watermarks WHERE user_id = ? AND scrobbler = ?",
    )
    .bind(user_id.as_i64())
    .bind(scrobbler.as_i64())
    .fetch_optional(pool)
    .await?;

    Ok(ts.and_then(from_unix_seconds))
}

pub async fn store_watermark(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    watermark: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_watermarks (user_id, scrobbler, watermark_ts, updated_at)
        VALUES (?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(user_id, scrobbler) DO UPDATE SET
            watermark_ts = excluded.watermark_ts,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id.as_i64())
    .bind(scrobbler.as_i64())
    .bind(to_unix_seconds(watermark))
    .execute(pool)
    .await?;

    tracing::debug!(user_id = %user_id, scrobbler = %scrobbler, watermark = %watermark, "Watermark stored");
    Ok(())
}

/// Forget sync progress so the next cycle re-imports from the beginning
pub async fn clear_watermark(pool: &SqlitePool, user_id: UserId, scrobbler: ScrobblerKind) -> Result<()> {
    sqlx::query("DELETE FROM sync_watermarks WHERE user_id = ? AND scrobbler = ?")
        .bind(user_id.as_i64())
        .bind(scrobbler.as_i64())
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scrobsync_common::db::init_memory_database;

    #[tokio::test]
    async fn test_watermark_upsert_and_clear() {
        let pool = init_memory_database().await.unwrap();
        let user: i64 = sqlx::query_scalar("INSERT INTO users (login_name) VALUES ('u') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();
        let user = UserId(user);

        assert!(load_watermark(&pool, user, ScrobblerKind::ListenBrainz).await.unwrap().is_none());

        let first = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2022, 3, 2, 12, 0, 0).unwrap();
        store_watermark(&pool, user, ScrobblerKind::ListenBrainz, first).await.unwrap();
        store_watermark(&pool, user, ScrobblerKind::ListenBrainz, second).await.unwrap();

        assert_eq!(
            load_watermark(&pool, user, ScrobblerKind::ListenBrainz).await.unwrap(),
            Some(second)
        );

        clear_watermark(&pool, user, ScrobblerKind::ListenBrainz).await.unwrap();
        assert!(load_watermark(&pool, user, ScrobblerKind::ListenBrainz).await.unwrap().is_none());
    }
}
