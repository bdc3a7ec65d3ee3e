//! Scrobbling service: entry point for players and statistics consumers
//!
//! Routes each playback event to the scrobbler the user selected and
//! answers history and statistics queries for that same service.

use crate::config::EngineSettings;
use crate::db::{listens, users};
use crate::error::{ScrobblingError, ScrobblingResult};
use crate::models::{
    Listen, ListenRecord, Range, RangeResults, StatsEntity, StatsFilter, StatsMetric, TimedListen,
};
use crate::services::listenbrainz_client::ListenHistoryClient;
use crate::services::listens_synchronizer::{ImportOutcome, ListensSynchronizer};
use crate::services::scrobbler::{InternalScrobbler, ListenBrainzScrobbler, Scrobbler};
use scrobsync_common::db::{ScrobblerKind, UserId};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct ScrobblingService {
    pool: SqlitePool,
    scrobblers: HashMap<ScrobblerKind, Arc<dyn Scrobbler>>,
    synchronizer: Arc<ListensSynchronizer>,
}

impl ScrobblingService {
    /// Service with the built-in scrobblers for every [`ScrobblerKind`]
    pub fn new(pool: SqlitePool, client: Arc<dyn ListenHistoryClient>, settings: &EngineSettings) -> Self {
        let synchronizer = Arc::new(ListensSynchronizer::new(
            pool.clone(),
            client,
            settings.synchronizer.clone(),
        ));

        let scrobblers: Vec<Arc<dyn Scrobbler>> = vec![
            Arc::new(InternalScrobbler::new(pool.clone(), settings.internal_threshold)),
            Arc::new(ListenBrainzScrobbler::new(
                pool.clone(),
                settings.listenbrainz_threshold,
                Arc::clone(&synchronizer),
            )),
        ];

        Self::with_scrobblers(pool, synchronizer, scrobblers)
    }

    pub fn with_scrobblers(
        pool: SqlitePool,
        synchronizer: Arc<ListensSynchronizer>,
        scrobblers: Vec<Arc<dyn Scrobbler>>,
    ) -> Self {
        let scrobblers = scrobblers
            .into_iter()
            .map(|scrobbler| (scrobbler.kind(), scrobbler))
            .collect();

        Self {
            pool,
            scrobblers,
            synchronizer,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn synchronizer(&self) -> &Arc<ListensSynchronizer> {
        &self.synchronizer
    }

    pub fn scrobbler(&self, kind: ScrobblerKind) -> ScrobblingResult<&Arc<dyn Scrobbler>> {
        self.scrobblers
            .get(&kind)
            .ok_or(ScrobblingError::NoScrobbler(kind))
    }

    /// Service the user currently scrobbles to
    pub async fn user_scrobbler(&self, user_id: UserId) -> ScrobblingResult<ScrobblerKind> {
        users::find_user(&self.pool, user_id)
            .await?
            .map(|user| user.scrobbler)
            .ok_or(ScrobblingError::UnknownUser(user_id))
    }

    async fn scrobbler_for(&self, user_id: UserId) -> ScrobblingResult<&Arc<dyn Scrobbler>> {
        let kind = self.user_scrobbler(user_id).await?;
        self.scrobbler(kind)
    }

    /// Start background synchronization
    pub fn start(&self) {
        self.synchronizer.start_periodic_sync();
    }

    /// "Now playing"; failures are logged, never returned
    pub async fn listen_started(&self, listen: Listen) {
        let result = match self.scrobbler_for(listen.user_id).await {
            Ok(scrobbler) => scrobbler.listen_started(&listen).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(user_id = %listen.user_id, track_id = %listen.track_id, "Listen start not reported: {}", e);
        }
    }

    pub async fn listen_finished(
        &self,
        listen: Listen,
        played: Option<Duration>,
    ) -> ScrobblingResult<Option<ListenRecord>> {
        self.scrobbler_for(listen.user_id)
            .await?
            .listen_finished(&listen, played)
            .await
    }

    pub async fn add_timed_listen(&self, timed: TimedListen) -> ScrobblingResult<bool> {
        self.scrobbler_for(timed.listen.user_id)
            .await?
            .add_timed_listen(&timed)
            .await
    }

    /// Login hook: start a backfill in the background
    pub fn on_user_login(&self, user_id: UserId) {
        self.synchronizer.spawn_import(user_id);
    }

    /// Run a backfill now and wait for it
    pub async fn import_listens(&self, user_id: UserId) -> ScrobblingResult<ImportOutcome> {
        self.synchronizer.trigger_import(user_id).await
    }

    /// Listens of the user through their current service
    pub async fn count(&self, user_id: UserId) -> ScrobblingResult<u64> {
        let kind = self.user_scrobbler(user_id).await?;
        Ok(listens::count(&self.pool, user_id, Some(kind)).await?)
    }

    /// Listening history through the user's current service, most recent first
    pub async fn listens(&self, user_id: UserId, range: Range) -> ScrobblingResult<RangeResults<ListenRecord>> {
        let kind = self.user_scrobbler(user_id).await?;
        Ok(listens::find_page(&self.pool, user_id, kind, range).await?)
    }

    /// Ranked entity ids for the user's current service
    pub async fn stats(
        &self,
        user_id: UserId,
        entity: StatsEntity,
        metric: StatsMetric,
        filter: &StatsFilter,
        range: Range,
    ) -> ScrobblingResult<RangeResults<i64>> {
        let kind = self.user_scrobbler(user_id).await?;
        Ok(listens::aggregate(&self.pool, user_id, kind, entity, metric, filter, range).await?)
    }

    pub async fn shutdown(&self) {
        self.synchronizer.shutdown().await;
    }
}
