//! Database Test Utilities
//!
//! In-memory and on-disk databases with the schema applied, plus catalog
//! seeding shortcuts.

use chrono::{DateTime, TimeZone, Utc};
use scrobsync::db::catalog::{self, NewTrack};
use scrobsync::db::users;
use scrobsync_common::db::{
    init_database, init_memory_database, ScrobblerKind, TrackArtistLinkType, TrackId, UserId,
};
use sqlx::SqlitePool;
use std::time::Duration;
use tempfile::TempDir;

/// In-memory database with schema
pub async fn create_test_db() -> SqlitePool {
    init_memory_database().await.unwrap()
}

/// On-disk database (WAL, multiple connections)
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_file_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("scrobsync.db"))
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Create a user, with a ListenBrainz token when given
pub async fn create_user(
    pool: &SqlitePool,
    login: &str,
    scrobbler: ScrobblerKind,
    token: Option<&str>,
) -> UserId {
    let id = users::create_user(pool, login, scrobbler).await.unwrap();
    if token.is_some() {
        users::set_listenbrainz_token(pool, id, token).await.unwrap();
    }
    id
}

/// Create a track credited to one artist, optionally on a release
///
/// Artists and releases are created on every call; names need not be unique.
pub async fn seed_track(
    pool: &SqlitePool,
    title: &str,
    artist: &str,
    release: Option<&str>,
) -> TrackId {
    let release_id = match release {
        Some(name) => Some(catalog::create_release(pool, name, None).await.unwrap()),
        None => None,
    };

    let track = catalog::create_track(
        pool,
        &NewTrack {
            title: title.to_string(),
            duration: Some(Duration::from_secs(200)),
            recording_mbid: None,
            release_id,
        },
    )
    .await
    .unwrap();

    let artist_id = catalog::create_artist(pool, artist, None).await.unwrap();
    catalog::link_artist(pool, track, artist_id, TrackArtistLinkType::Artist)
        .await
        .unwrap();

    track
}

/// Unix seconds to UTC timestamp
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}
