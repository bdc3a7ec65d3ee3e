//! Listen store
//!
//! Append-only log of completed playbacks. Every function takes the storage
//! handle and the user explicitly; there is no ambient session.
//!
//! The six statistics queries (top/recent × artist/release/track) are one
//! parameterized aggregation: group listens by entity, rank by metric
//! descending, break ties by ascending entity id, paginate.

use crate::models::{
    ListenKey, ListenRecord, Range, RangeResults, StatsEntity, StatsFilter, StatsMetric,
    TimedListen,
};
use scrobsync_common::db::{
    ArtistId, ListenId, ReleaseId, ScrobblerKind, TrackId, UserId,
};
use scrobsync_common::time::{from_unix_seconds, to_unix_seconds};
use scrobsync_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

const LISTEN_COLUMNS: &str = "id, user_id, track_id, scrobbler, listened_at";

fn listen_from_row(row: &SqliteRow) -> Result<ListenRecord> {
    let listened_at: i64 = row.get("listened_at");

    Ok(ListenRecord {
        id: ListenId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        track_id: TrackId(row.get("track_id")),
        scrobbler: ScrobblerKind::try_from(row.get::<i64, _>("scrobbler"))?,
        listened_at: from_unix_seconds(listened_at).ok_or_else(|| {
            Error::InvalidInput(format!("listen timestamp out of range: {}", listened_at))
        })?,
    })
}

/// Total listens of a user, optionally restricted to one service
pub async fn count(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: Option<ScrobblerKind>,
) -> Result<u64> {
    let count: i64 = match scrobbler {
        Some(kind) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM listens WHERE user_id = ? AND scrobbler = ?")
                .bind(user_id.as_i64())
                .bind(kind.as_i64())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM listens WHERE user_id = ?")
                .bind(user_id.as_i64())
                .fetch_one(pool)
                .await?
        }
    };

    Ok(count.max(0) as u64)
}

/// Total listens stored, all users included
pub async fn count_all(pool: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listens")
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

/// Listening history, most recent first
pub async fn find_page(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    range: Range,
) -> Result<RangeResults<ListenRecord>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM listens
        WHERE user_id = ? AND scrobbler = ?
        ORDER BY listened_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
        LISTEN_COLUMNS
    );

    let rows = sqlx::query(&sql)
        .bind(user_id.as_i64())
        .bind(scrobbler.as_i64())
        .bind(range.sql_limit())
        .bind(range.sql_offset())
        .fetch_all(pool)
        .await?;

    let records = rows
        .iter()
        .map(listen_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(RangeResults::from_fetched(range, records))
}

/// Look up a listen by its idempotency key
pub async fn find(pool: &SqlitePool, key: &ListenKey) -> Result<Option<ListenRecord>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM listens
        WHERE user_id = ? AND track_id = ? AND scrobbler = ? AND listened_at = ?
        "#,
        LISTEN_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(key.user_id.as_i64())
        .bind(key.track_id.as_i64())
        .bind(key.scrobbler.as_i64())
        .bind(to_unix_seconds(key.listened_at))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(listen_from_row).transpose()
}

pub async fn find_by_id(pool: &SqlitePool, id: ListenId) -> Result<Option<ListenRecord>> {
    let sql = format!("SELECT {} FROM listens WHERE id = ?", LISTEN_COLUMNS);

    let row = sqlx::query(&sql)
        .bind(id.as_i64())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(listen_from_row).transpose()
}

/// Insert a listen, or return the stored one if the key already exists
///
/// Returns the record and whether this call inserted it. The insert and the
/// read-back share one transaction, so concurrent writers of the same key
/// end up with exactly one row and the loser sees a no-op.
pub async fn insert(pool: &SqlitePool, key: &ListenKey) -> Result<(ListenRecord, bool)> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO listens (user_id, track_id, scrobbler, listened_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, track_id, scrobbler, listened_at) DO NOTHING
        "#,
    )
    .bind(key.user_id.as_i64())
    .bind(key.track_id.as_i64())
    .bind(key.scrobbler.as_i64())
    .bind(to_unix_seconds(key.listened_at))
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    let sql = format!(
        r#"
        SELECT {}
        FROM listens
        WHERE user_id = ? AND track_id = ? AND scrobbler = ? AND listened_at = ?
        "#,
        LISTEN_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(key.user_id.as_i64())
        .bind(key.track_id.as_i64())
        .bind(key.scrobbler.as_i64())
        .bind(to_unix_seconds(key.listened_at))
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((listen_from_row(&row)?, inserted))
}

/// Create a listen (upsert semantics, see [`insert`])
pub async fn create(pool: &SqlitePool, key: &ListenKey) -> Result<ListenRecord> {
    let (record, inserted) = insert(pool, key).await?;

    if inserted {
        tracing::debug!(
            user_id = %key.user_id,
            track_id = %key.track_id,
            scrobbler = %key.scrobbler,
            "Listen created"
        );
    } else {
        tracing::debug!(
            user_id = %key.user_id,
            track_id = %key.track_id,
            scrobbler = %key.scrobbler,
            "Listen already stored, creation is a no-op"
        );
    }

    Ok(record)
}

/// Store a historical listen; returns false when it was already present
pub async fn add_timed_listen(
    pool: &SqlitePool,
    scrobbler: ScrobblerKind,
    timed: &TimedListen,
) -> Result<bool> {
    let key = ListenKey::for_timed(scrobbler, timed);
    let (_, inserted) = insert(pool, &key).await?;
    Ok(inserted)
}

/// Artists ranked by listen count
pub async fn top_artists(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<ArtistId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Artist, StatsMetric::ListenCount, filter, range)
        .await
        .map(|page| page.map(ArtistId))
}

/// Releases ranked by listen count
pub async fn top_releases(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<ReleaseId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Release, StatsMetric::ListenCount, filter, range)
        .await
        .map(|page| page.map(ReleaseId))
}

/// Tracks ranked by listen count
pub async fn top_tracks(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<TrackId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Track, StatsMetric::ListenCount, filter, range)
        .await
        .map(|page| page.map(TrackId))
}

/// Artists by most recent listen, each at most once
pub async fn recent_artists(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<ArtistId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Artist, StatsMetric::LastListened, filter, range)
        .await
        .map(|page| page.map(ArtistId))
}

/// Releases by most recent listen, each at most once
pub async fn recent_releases(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<ReleaseId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Release, StatsMetric::LastListened, filter, range)
        .await
        .map(|page| page.map(ReleaseId))
}

/// Tracks by most recent listen, each at most once
pub async fn recent_tracks(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<TrackId>> {
    aggregate(pool, user_id, scrobbler, StatsEntity::Track, StatsMetric::LastListened, filter, range)
        .await
        .map(|page| page.map(TrackId))
}

/// Group a user's listens by entity and rank them
///
/// Artist grouping counts each listen once per artist even when the track
/// credits that artist under several roles. Tracks without a release do not
/// contribute to release grouping.
pub async fn aggregate(
    pool: &SqlitePool,
    user_id: UserId,
    scrobbler: ScrobblerKind,
    entity: StatsEntity,
    metric: StatsMetric,
    filter: &StatsFilter,
    range: Range,
) -> Result<RangeResults<i64>> {
    let entity_column = match entity {
        StatsEntity::Artist => "tal.artist_id",
        StatsEntity::Release => "t.release_id",
        StatsEntity::Track => "l.track_id",
    };
    let metric_expression = match metric {
        StatsMetric::ListenCount => "COUNT(DISTINCT l.id)",
        StatsMetric::LastListened => "MAX(l.listened_at)",
    };

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
    qb.push(entity_column)
        .push(" AS entity_id, ")
        .push(metric_expression)
        .push(" AS metric FROM listens l JOIN tracks t ON t.id = l.track_id");

    if entity == StatsEntity::Artist {
        qb.push(" JOIN track_artist_links tal ON tal.track_id = l.track_id");
    }

    qb.push(" WHERE l.user_id = ")
        .push_bind(user_id.as_i64())
        .push(" AND l.scrobbler = ")
        .push_bind(scrobbler.as_i64());

    if entity == StatsEntity::Artist {
        if let Some(link_type) = filter.link_type {
            qb.push(" AND tal.link_type = ").push_bind(link_type.as_i64());
        }
    }

    if entity == StatsEntity::Release {
        qb.push(" AND t.release_id IS NOT NULL");
    }

    let clusters = filter.distinct_clusters();
    if !clusters.is_empty() {
        qb.push(
            " AND l.track_id IN (SELECT tc.track_id FROM track_clusters tc WHERE tc.cluster_id IN (",
        );
        let mut ids = qb.separated(", ");
        for cluster_id in &clusters {
            ids.push_bind(cluster_id.as_i64());
        }
        qb.push(") GROUP BY tc.track_id HAVING COUNT(DISTINCT tc.cluster_id) = ")
            .push_bind(clusters.len() as i64)
            .push(")");
    }

    qb.push(" GROUP BY entity_id ORDER BY metric DESC, entity_id ASC LIMIT ")
        .push_bind(range.sql_limit())
        .push(" OFFSET ")
        .push_bind(range.sql_offset());

    let ids = qb.build_query_scalar::<i64>().fetch_all(pool).await?;

    Ok(RangeResults::from_fetched(range, ids))
}
