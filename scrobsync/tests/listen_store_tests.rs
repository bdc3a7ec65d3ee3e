//! Integration tests for the listen store
//!
//! Covers idempotent creation, pagination and the ranked aggregates.

mod helpers;

use chrono::{TimeZone, Utc};
use helpers::{create_file_db, create_test_db, create_user, seed_track, ts};
use scrobsync::db::{catalog, listens, users};
use scrobsync::models::{Listen, ListenKey, Range, StatsFilter, TimedListen};
use scrobsync_common::db::{ArtistId, ScrobblerKind, TrackArtistLinkType, TrackId, UserId};
use sqlx::SqlitePool;
use tokio::task::JoinSet;

const INTERNAL: ScrobblerKind = ScrobblerKind::Internal;

async fn listen_at(pool: &SqlitePool, user: UserId, track: TrackId, secs: i64) {
    listens::create(pool, &ListenKey::new(user, track, INTERNAL, ts(secs)))
        .await
        .unwrap();
}

async fn artist_of(pool: &SqlitePool, track: TrackId) -> ArtistId {
    let id: i64 = sqlx::query_scalar("SELECT artist_id FROM track_artist_links WHERE track_id = ?")
        .bind(track.as_i64())
        .fetch_one(pool)
        .await
        .unwrap();
    ArtistId(id)
}

#[tokio::test]
async fn test_add_timed_listen_is_idempotent() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let track = seed_track(&pool, "Song", "Band", None).await;
    let timed = TimedListen::new(Listen::new(user, track), ts(1_600_000_000));

    assert!(listens::add_timed_listen(&pool, INTERNAL, &timed).await.unwrap());
    for _ in 0..3 {
        assert!(!listens::add_timed_listen(&pool, INTERNAL, &timed).await.unwrap());
    }

    assert_eq!(listens::count(&pool, user, Some(INTERNAL)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_pagination_visits_every_listen_once() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let other = create_user(&pool, "bob", INTERNAL, None).await;
    let track = seed_track(&pool, "Song", "Band", None).await;

    for i in 0..25 {
        listen_at(&pool, user, track, 1_000 + i).await;
    }
    listen_at(&pool, other, track, 5_000).await;

    let mut seen = Vec::new();
    let mut range = Range::new(0, 10);
    loop {
        let page = listens::find_page(&pool, user, INTERNAL, range).await.unwrap();
        seen.extend(page.results.iter().map(|r| r.listened_at));
        if !page.more_results {
            break;
        }
        range = range.next();
    }

    assert_eq!(seen.len(), 25);
    let expected: Vec<_> = (0..25).rev().map(|i| ts(1_000 + i)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_top_artists_ranking_and_ties() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let a = seed_track(&pool, "a", "A", None).await;
    let b = seed_track(&pool, "b", "B", None).await;
    let c = seed_track(&pool, "c", "C", None).await;

    let mut secs = 0;
    for (track, times) in [(a, 5), (b, 3), (c, 3)] {
        for _ in 0..times {
            secs += 1;
            listen_at(&pool, user, track, secs).await;
        }
    }

    let page = listens::top_artists(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 2))
        .await
        .unwrap();
    assert_eq!(page.results, vec![artist_of(&pool, a).await, artist_of(&pool, b).await]);
    assert!(page.more_results);

    let page = listens::top_artists(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(2, 2))
        .await
        .unwrap();
    assert_eq!(page.results, vec![artist_of(&pool, c).await]);
    assert!(!page.more_results);

    let tracks = listens::top_tracks(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(tracks.results, vec![a, b, c]);
}

#[tokio::test]
async fn test_recent_tracks_lists_each_track_once() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let t = seed_track(&pool, "T", "Band", None).await;
    let u = seed_track(&pool, "U", "Band", None).await;

    let day = |d: u32| Utc.with_ymd_and_hms(2021, 1, d, 12, 0, 0).unwrap();
    for (track, at) in [(t, day(1)), (u, day(2)), (t, day(3))] {
        listens::create(&pool, &ListenKey::new(user, track, INTERNAL, at)).await.unwrap();
    }

    let page = listens::recent_tracks(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.results, vec![t, u]);
    assert!(!page.more_results);
}

#[tokio::test]
async fn test_release_stats_skip_tracks_without_release() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let on_release = seed_track(&pool, "Album Song", "Band", Some("Album")).await;
    let single = seed_track(&pool, "Single", "Band", None).await;

    listen_at(&pool, user, single, 10).await;
    listen_at(&pool, user, single, 20).await;
    listen_at(&pool, user, on_release, 30).await;

    let top = listens::top_releases(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(top.results.len(), 1);

    let recent = listens::recent_releases(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(recent.results, top.results);
}

#[tokio::test]
async fn test_cluster_filter_scopes_aggregates() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let rock_live = seed_track(&pool, "Rock Live", "R", None).await;
    let rock = seed_track(&pool, "Rock", "R2", None).await;
    let jazz = seed_track(&pool, "Jazz", "J", None).await;

    let rock_cluster = catalog::create_cluster(&pool, "genre", "rock").await.unwrap();
    let live_cluster = catalog::create_cluster(&pool, "mood", "live").await.unwrap();
    catalog::add_track_to_cluster(&pool, rock_live, rock_cluster).await.unwrap();
    catalog::add_track_to_cluster(&pool, rock_live, live_cluster).await.unwrap();
    catalog::add_track_to_cluster(&pool, rock, rock_cluster).await.unwrap();

    // Jazz has the most listens but sits outside every cluster
    for secs in 1..=5 {
        listen_at(&pool, user, jazz, secs).await;
    }
    listen_at(&pool, user, rock, 10).await;
    listen_at(&pool, user, rock, 11).await;
    listen_at(&pool, user, rock_live, 12).await;

    let rock_only = StatsFilter::default().with_clusters([rock_cluster]);
    let page = listens::top_tracks(&pool, user, INTERNAL, &rock_only, Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.results, vec![rock, rock_live]);

    let both = StatsFilter::default().with_clusters([rock_cluster, live_cluster]);
    let page = listens::top_artists(&pool, user, INTERNAL, &both, Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.results, vec![artist_of(&pool, rock_live).await]);

    let page = listens::recent_tracks(&pool, user, INTERNAL, &both, Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.results, vec![rock_live]);
}

#[tokio::test]
async fn test_link_type_filter_and_multi_role_artist() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let track = seed_track(&pool, "Song", "Singer", None).await;
    let singer = artist_of(&pool, track).await;
    let composer = catalog::create_artist(&pool, "Composer", None).await.unwrap();
    catalog::link_artist(&pool, track, composer, TrackArtistLinkType::Composer).await.unwrap();
    // Same artist under a second role must not double count
    catalog::link_artist(&pool, track, singer, TrackArtistLinkType::Performer).await.unwrap();

    listen_at(&pool, user, track, 1).await;
    listen_at(&pool, user, track, 2).await;

    let all = listens::top_artists(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(all.results, vec![singer, composer]);

    let composers = StatsFilter::default().with_link_type(TrackArtistLinkType::Composer);
    let page = listens::top_artists(&pool, user, INTERNAL, &composers, Range::new(0, 10))
        .await
        .unwrap();
    assert_eq!(page.results, vec![composer]);
}

#[tokio::test]
async fn test_stats_are_scoped_to_scrobbler() {
    let pool = create_test_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let track = seed_track(&pool, "Song", "Band", None).await;

    listens::create(&pool, &ListenKey::new(user, track, ScrobblerKind::ListenBrainz, ts(5)))
        .await
        .unwrap();

    let page = listens::top_tracks(&pool, user, INTERNAL, &StatsFilter::default(), Range::new(0, 10))
        .await
        .unwrap();
    assert!(page.is_empty());
    assert_eq!(listens::count(&pool, user, Some(ScrobblerKind::ListenBrainz)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_listens_cascade_with_user_and_track() {
    let pool = create_test_db().await;
    let alice = create_user(&pool, "alice", INTERNAL, None).await;
    let bob = create_user(&pool, "bob", INTERNAL, None).await;
    let kept = seed_track(&pool, "Kept", "Band", None).await;
    let removed = seed_track(&pool, "Removed", "Band", None).await;

    listen_at(&pool, alice, kept, 1).await;
    listen_at(&pool, alice, removed, 2).await;
    listen_at(&pool, bob, kept, 3).await;
    listen_at(&pool, bob, removed, 4).await;

    assert!(catalog::delete_track(&pool, removed).await.unwrap());
    assert_eq!(listens::count_all(&pool).await.unwrap(), 2);

    assert!(users::delete_user(&pool, alice).await.unwrap());
    assert_eq!(listens::count_all(&pool).await.unwrap(), 1);
    assert_eq!(listens::count(&pool, bob, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_create_yields_one_row() {
    let (_dir, pool) = create_file_db().await;
    let user = create_user(&pool, "alice", INTERNAL, None).await;
    let track = seed_track(&pool, "Song", "Band", None).await;
    let key = ListenKey::new(user, track, INTERNAL, ts(1_700_000_000));

    let mut join_set = JoinSet::new();
    for _ in 0..8 {
        let pool = pool.clone();
        join_set.spawn(async move { listens::create(&pool, &key).await.unwrap().id });
    }

    let mut ids = Vec::new();
    while let Some(id) = join_set.join_next().await {
        ids.push(id.unwrap());
    }

    assert_eq!(ids.len(), 8);
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(listens::count_all(&pool).await.unwrap(), 1);
}
