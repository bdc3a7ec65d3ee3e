//! Catalog access needed by scrobbling
//!
//! The engine does not own the music catalog; it reads track metadata for
//! outbound submissions and matches remote history entries against local
//! tracks. The write helpers exist so deployments and tests can seed it.

use crate::models::TrackInfo;
use scrobsync_common::db::{
    ArtistId, ClusterId, ReleaseId, TrackArtistLinkType, TrackId,
};
use scrobsync_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Track to insert into the catalog
#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub title: String,
    pub duration: Option<Duration>,
    pub recording_mbid: Option<Uuid>,
    pub release_id: Option<ReleaseId>,
}

impl NewTrack {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub async fn create_artist(pool: &SqlitePool, name: &str, mbid: Option<Uuid>) -> Result<ArtistId> {
    let id: i64 = sqlx::query_scalar("INSERT INTO artists (name, mbid) VALUES (?, ?) RETURNING id")
        .bind(name)
        .bind(mbid.map(|m| m.to_string()))
        .fetch_one(pool)
        .await?;
    Ok(ArtistId(id))
}

pub async fn create_release(pool: &SqlitePool, name: &str, mbid: Option<Uuid>) -> Result<ReleaseId> {
    let id: i64 = sqlx::query_scalar("INSERT INTO releases (name, mbid) VALUES (?, ?) RETURNING id")
        .bind(name)
        .bind(mbid.map(|m| m.to_string()))
        .fetch_one(pool)
        .await?;
    Ok(ReleaseId(id))
}

pub async fn create_track(pool: &SqlitePool, track: &NewTrack) -> Result<TrackId> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tracks (title, duration_ms, recording_mbid, release_id)
        VALUES (?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&track.title)
    .bind(track.duration.map(duration_to_ms))
    .bind(track.recording_mbid.map(|m| m.to_string()))
    .bind(track.release_id.map(|r| r.as_i64()))
    .fetch_one(pool)
    .await?;

    debug!(track_id = id, title = %track.title, "Track created");
    Ok(TrackId(id))
}

/// Credit an artist on a track under a role (no-op if already credited)
pub async fn link_artist(
    pool: &SqlitePool,
    track_id: TrackId,
    artist_id: ArtistId,
    link_type: TrackArtistLinkType,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO track_artist_links (track_id, artist_id, link_type)
        VALUES (?, ?, ?)
        ON CONFLICT(track_id, artist_id, link_type) DO NOTHING
        "#,
    )
    .bind(track_id.as_i64())
    .bind(artist_id.as_i64())
    .bind(link_type.as_i64())
    .execute(pool)
    .await?;
    Ok(())
}

/// Get or create a cluster (genre, mood, ...) by type and name
pub async fn create_cluster(pool: &SqlitePool, cluster_type: &str, name: &str) -> Result<ClusterId> {
    sqlx::query(
        "INSERT INTO clusters (cluster_type, name) VALUES (?, ?) ON CONFLICT(cluster_type, name) DO NOTHING",
    )
    .bind(cluster_type)
    .bind(name)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM clusters WHERE cluster_type = ? AND name = ?")
        .bind(cluster_type)
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(ClusterId(id))
}

pub async fn add_track_to_cluster(pool: &SqlitePool, track_id: TrackId, cluster_id: ClusterId) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO track_clusters (track_id, cluster_id) VALUES (?, ?)")
        .bind(track_id.as_i64())
        .bind(cluster_id.as_i64())
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove a track; its listens go with it
pub async fn delete_track(pool: &SqlitePool, track_id: TrackId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(track_id.as_i64())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Track duration, if the catalog knows it
pub async fn track_duration(pool: &SqlitePool, track_id: TrackId) -> Result<Option<Duration>> {
    let row = sqlx::query("SELECT duration_ms FROM tracks WHERE id = ?")
        .bind(track_id.as_i64())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;

    let duration_ms: Option<i64> = row.get("duration_ms");
    Ok(duration_ms
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64)))
}

/// Metadata of a track as sent to remote services
///
/// The artist credit joins every `Artist` link in insertion order. A stored
/// MBID that does not parse is logged and omitted rather than failing the
/// submission.
pub async fn load_track_info(pool: &SqlitePool, track_id: TrackId) -> Result<Option<TrackInfo>> {
    let row = sqlx::query(
        r#"
        SELECT t.title, t.duration_ms, t.recording_mbid, r.name AS release_name
        FROM tracks t
        LEFT JOIN releases r ON r.id = t.release_id
        WHERE t.id = ?
        "#,
    )
    .bind(track_id.as_i64())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let artists: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT a.name
        FROM track_artist_links tal
        JOIN artists a ON a.id = tal.artist_id
        WHERE tal.track_id = ? AND tal.link_type = ?
        ORDER BY tal.id
        "#,
    )
    .bind(track_id.as_i64())
    .bind(TrackArtistLinkType::Artist.as_i64())
    .fetch_all(pool)
    .await?;

    let recording_mbid = row
        .get::<Option<String>, _>("recording_mbid")
        .and_then(|raw| match Uuid::parse_str(&raw) {
            Ok(mbid) => Some(mbid),
            Err(e) => {
                warn!(track_id = %track_id, mbid = %raw, "Ignoring malformed recording MBID: {}", e);
                None
            }
        });

    let duration_ms: Option<i64> = row.get("duration_ms");

    Ok(Some(TrackInfo {
        title: row.get("title"),
        artist_name: artists.join(", "),
        release_name: row.get("release_name"),
        recording_mbid,
        duration: duration_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64)),
    }))
}

/// Find the local track a remote history entry refers to
///
/// Matching order:
/// 1. Recording MBID, when present and known locally
/// 2. Case-insensitive title plus artist credit (plus release name, if the
///    entry carries one)
///
/// When several tracks match, the lowest id wins.
pub async fn resolve_track(pool: &SqlitePool, info: &TrackInfo) -> Result<Option<TrackId>> {
    if let Some(mbid) = info.recording_mbid {
        let by_mbid: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM tracks WHERE recording_mbid = ? ORDER BY id LIMIT 1",
        )
        .bind(mbid.to_string())
        .fetch_optional(pool)
        .await?;

        if let Some(id) = by_mbid {
            return Ok(Some(TrackId(id)));
        }
    }

    let candidates: Vec<i64> = match &info.release_name {
        Some(release_name) => {
            sqlx::query_scalar(
                r#"
                SELECT t.id
                FROM tracks t
                JOIN releases r ON r.id = t.release_id
                WHERE t.title = ? COLLATE NOCASE AND r.name = ? COLLATE NOCASE
                ORDER BY t.id
                "#,
            )
            .bind(&info.title)
            .bind(release_name)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT id FROM tracks WHERE title = ? COLLATE NOCASE ORDER BY id")
                .bind(&info.title)
                .fetch_all(pool)
                .await?
        }
    };

    for id in candidates {
        let Some(local) = load_track_info(pool, TrackId(id)).await? else {
            continue;
        };
        if local.artist_name.eq_ignore_ascii_case(&info.artist_name) {
            return Ok(Some(TrackId(id)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrobsync_common::db::init_memory_database;

    #[tokio::test]
    async fn test_load_track_info_joins_artist_credit() {
        let pool = init_memory_database().await.unwrap();
        let release = create_release(&pool, "Album", None).await.unwrap();
        let mbid = Uuid::new_v4();
        let track = create_track(
            &pool,
            &NewTrack {
                title: "Song".to_string(),
                duration: Some(Duration::from_secs(200)),
                recording_mbid: Some(mbid),
                release_id: Some(release),
            },
        )
        .await
        .unwrap();
        let first = create_artist(&pool, "First", None).await.unwrap();
        let second = create_artist(&pool, "Second", None).await.unwrap();
        let composer = create_artist(&pool, "Composer", None).await.unwrap();
        link_artist(&pool, track, first, TrackArtistLinkType::Artist).await.unwrap();
        link_artist(&pool, track, second, TrackArtistLinkType::Artist).await.unwrap();
        link_artist(&pool, track, composer, TrackArtistLinkType::Composer).await.unwrap();

        let info = load_track_info(&pool, track).await.unwrap().unwrap();
        assert_eq!(info.title, "Song");
        assert_eq!(info.artist_name, "First, Second");
        assert_eq!(info.release_name.as_deref(), Some("Album"));
        assert_eq!(info.recording_mbid, Some(mbid));
        assert_eq!(info.duration, Some(Duration::from_secs(200)));

        assert!(load_track_info(&pool, TrackId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_track_prefers_mbid_then_names() {
        let pool = init_memory_database().await.unwrap();
        let mbid = Uuid::new_v4();
        let artist = create_artist(&pool, "Band", None).await.unwrap();

        let with_mbid = create_track(
            &pool,
            &NewTrack {
                recording_mbid: Some(mbid),
                ..NewTrack::new("Tagged")
            },
        )
        .await
        .unwrap();
        let by_name = create_track(&pool, &NewTrack::new("Plain")).await.unwrap();
        link_artist(&pool, with_mbid, artist, TrackArtistLinkType::Artist).await.unwrap();
        link_artist(&pool, by_name, artist, TrackArtistLinkType::Artist).await.unwrap();

        let remote = TrackInfo {
            title: "whatever".to_string(),
            artist_name: "nobody".to_string(),
            release_name: None,
            recording_mbid: Some(mbid),
            duration: None,
        };
        assert_eq!(resolve_track(&pool, &remote).await.unwrap(), Some(with_mbid));

        let remote = TrackInfo {
            title: "PLAIN".to_string(),
            artist_name: "band".to_string(),
            release_name: None,
            recording_mbid: Some(Uuid::new_v4()),
            duration: None,
        };
        assert_eq!(resolve_track(&pool, &remote).await.unwrap(), Some(by_name));

        let remote = TrackInfo {
            title: "Plain".to_string(),
            artist_name: "Other Band".to_string(),
            release_name: None,
            recording_mbid: None,
            duration: None,
        };
        assert_eq!(resolve_track(&pool, &remote).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_cluster_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        let a = create_cluster(&pool, "genre", "rock").await.unwrap();
        let b = create_cluster(&pool, "genre", "rock").await.unwrap();
        let c = create_cluster(&pool, "mood", "rock").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
