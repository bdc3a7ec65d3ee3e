//! Listen events and stored listen records

use chrono::{DateTime, Utc};
use scrobsync_common::db::{ListenId, ScrobblerKind, TrackId, UserId};
use scrobsync_common::time::truncate_to_seconds;
use serde::{Deserialize, Serialize};

/// A live playback event reported by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listen {
    pub user_id: UserId,
    pub track_id: TrackId,
}

impl Listen {
    pub fn new(user_id: UserId, track_id: TrackId) -> Self {
        Self { user_id, track_id }
    }
}

/// A listen that happened at a known time (backfill import only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedListen {
    pub listen: Listen,
    pub listened_at: DateTime<Utc>,
}

impl TimedListen {
    pub fn new(listen: Listen, listened_at: DateTime<Utc>) -> Self {
        Self {
            listen,
            listened_at: truncate_to_seconds(listened_at),
        }
    }
}

/// Idempotency key of the listen log
///
/// Two events with the same key are the same listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenKey {
    pub user_id: UserId,
    pub track_id: TrackId,
    pub scrobbler: ScrobblerKind,
    pub listened_at: DateTime<Utc>,
}

impl ListenKey {
    pub fn new(
        user_id: UserId,
        track_id: TrackId,
        scrobbler: ScrobblerKind,
        listened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            track_id,
            scrobbler,
            listened_at: truncate_to_seconds(listened_at),
        }
    }

    pub fn for_timed(scrobbler: ScrobblerKind, timed: &TimedListen) -> Self {
        Self::new(
            timed.listen.user_id,
            timed.listen.track_id,
            scrobbler,
            timed.listened_at,
        )
    }
}

/// One stored, completed playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenRecord {
    pub id: ListenId,
    pub user_id: UserId,
    pub track_id: TrackId,
    pub scrobbler: ScrobblerKind,
    pub listened_at: DateTime<Utc>,
}

impl ListenRecord {
    pub fn key(&self) -> ListenKey {
        ListenKey::new(self.user_id, self.track_id, self.scrobbler, self.listened_at)
    }
}
