//! Scrobblers: per-service handling of playback events
//!
//! A finished listen is always written to the local log first. Services with
//! a remote counterpart then hand the stored record to the synchronizer, so
//! a remote outage never loses a listen and never fails playback reporting.

use crate::db::{catalog, listens};
use crate::error::{ScrobblingError, ScrobblingResult};
use crate::models::{Listen, ListenKey, ListenRecord, TimedListen};
use crate::services::listens_synchronizer::ListensSynchronizer;
use crate::services::play_threshold::PlayThreshold;
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use scrobsync_common::db::ScrobblerKind;
use scrobsync_common::time::now;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Scrobbler: Send + Sync {
    fn kind(&self) -> ScrobblerKind;

    /// Playback started ("now playing"); never waits on the network
    async fn listen_started(&self, listen: &Listen) -> ScrobblingResult<()>;

    /// Playback finished after `played` (unknown when `None`)
    ///
    /// Returns the stored record, or `None` when the play was too short to
    /// count. Only local persistence failures are reported.
    async fn listen_finished(
        &self,
        listen: &Listen,
        played: Option<Duration>,
    ) -> ScrobblingResult<Option<ListenRecord>>;

    /// Store a historical listen; `false` when it was already present
    async fn add_timed_listen(&self, timed: &TimedListen) -> ScrobblingResult<bool>;
}

async fn track_duration(pool: &SqlitePool, listen: &Listen) -> ScrobblingResult<Option<Duration>> {
    match catalog::track_duration(pool, listen.track_id).await {
        Ok(duration) => Ok(duration),
        Err(scrobsync_common::Error::NotFound(_)) => Err(ScrobblingError::UnknownTrack(listen.track_id)),
        Err(e) => Err(e.into()),
    }
}

/// Apply the threshold and store the listen stamped with the current time
async fn persist_finished(
    pool: &SqlitePool,
    kind: ScrobblerKind,
    threshold: PlayThreshold,
    listen: &Listen,
    played: Option<Duration>,
) -> ScrobblingResult<Option<ListenRecord>> {
    let duration = track_duration(pool, listen).await?;

    if !threshold.counts(played, duration) {
        debug!(
            user_id = %listen.user_id,
            track_id = %listen.track_id,
            played_secs = played.map(|p| p.as_secs()),
            "Playback too short to count as a listen"
        );
        return Ok(None);
    }

    let key = ListenKey::new(listen.user_id, listen.track_id, kind, now());
    let record = retry_on_lock("create listen", || listens::create(pool, &key)).await?;

    Ok(Some(record))
}

async fn persist_timed(pool: &SqlitePool, kind: ScrobblerKind, timed: &TimedListen) -> ScrobblingResult<bool> {
    let inserted = retry_on_lock("add timed listen", || listens::add_timed_listen(pool, kind, timed)).await?;
    Ok(inserted)
}

/// Local-only history
pub struct InternalScrobbler {
    pool: SqlitePool,
    threshold: PlayThreshold,
}

impl InternalScrobbler {
    pub fn new(pool: SqlitePool, threshold: PlayThreshold) -> Self {
        Self { pool, threshold }
    }
}

#[async_trait]
impl Scrobbler for InternalScrobbler {
    fn kind(&self) -> ScrobblerKind {
        ScrobblerKind::Internal
    }

    async fn listen_started(&self, listen: &Listen) -> ScrobblingResult<()> {
        debug!(user_id = %listen.user_id, track_id = %listen.track_id, "Listen started");
        Ok(())
    }

    async fn listen_finished(
        &self,
        listen: &Listen,
        played: Option<Duration>,
    ) -> ScrobblingResult<Option<ListenRecord>> {
        persist_finished(&self.pool, self.kind(), self.threshold, listen, played).await
    }

    async fn add_timed_listen(&self, timed: &TimedListen) -> ScrobblingResult<bool> {
        persist_timed(&self.pool, self.kind(), timed).await
    }
}

/// Local history mirrored to ListenBrainz
pub struct ListenBrainzScrobbler {
    pool: SqlitePool,
    threshold: PlayThreshold,
    synchronizer: Arc<ListensSynchronizer>,
}

impl ListenBrainzScrobbler {
    pub fn new(pool: SqlitePool, threshold: PlayThreshold, synchronizer: Arc<ListensSynchronizer>) -> Self {
        Self {
            pool,
            threshold,
            synchronizer,
        }
    }
}

#[async_trait]
impl Scrobbler for ListenBrainzScrobbler {
    fn kind(&self) -> ScrobblerKind {
        ScrobblerKind::ListenBrainz
    }

    async fn listen_started(&self, listen: &Listen) -> ScrobblingResult<()> {
        self.synchronizer.relay_now_playing(*listen);
        Ok(())
    }

    async fn listen_finished(
        &self,
        listen: &Listen,
        played: Option<Duration>,
    ) -> ScrobblingResult<Option<ListenRecord>> {
        let record = persist_finished(&self.pool, self.kind(), self.threshold, listen, played).await?;

        if let Some(record) = &record {
            self.synchronizer.enqueue(record.clone());
        }

        Ok(record)
    }

    async fn add_timed_listen(&self, timed: &TimedListen) -> ScrobblingResult<bool> {
        persist_timed(&self.pool, self.kind(), timed).await
    }
}
