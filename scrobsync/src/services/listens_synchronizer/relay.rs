//! Outbound relay
//!
//! One lane per user: an unbounded channel drained by a dedicated task.
//! Retries happen inside the lane, so a listen that keeps failing holds
//! back the user's later listens until it is delivered or dropped. Lanes of
//! different users never wait for each other.
//!
//! A lane left idle for `lane_idle_timeout` removes itself from the lane map
//! and exits; the next listen for that user starts a fresh lane. Retirement
//! happens under the map lock, so no listen is sent into a lane that is
//! about to exit.

use super::ListensSynchronizer;
use crate::db::{catalog, users};
use crate::models::{Listen, ListenRecord};
use crate::services::listenbrainz_client::{
    ListenHistoryClient, ListenType, OutgoingListen, SyncClientError,
};
use crate::utils::{retry_with_backoff, BackoffPolicy, RetryError};
use scrobsync_common::db::UserId;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Relay counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub delivered: u64,
    pub dropped: u64,
    /// Users with a running lane
    pub active_lanes: usize,
}

#[derive(Debug, Default)]
struct RelayStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RelayStats {
    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
struct RelayContext {
    pool: SqlitePool,
    client: Arc<dyn ListenHistoryClient>,
    policy: BackoffPolicy,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    stats: Arc<RelayStats>,
    lanes: Arc<LaneMap>,
}

struct Lane {
    id: u64,
    sender: mpsc::UnboundedSender<ListenRecord>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct LaneMap {
    lanes: Mutex<HashMap<UserId, Lane>>,
    next_id: AtomicU64,
}

impl LaneMap {
    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Lane>> {
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(super) struct Relay {
    ctx: RelayContext,
    tasks: TaskTracker,
}

impl Relay {
    pub(super) fn new(
        pool: SqlitePool,
        client: Arc<dyn ListenHistoryClient>,
        policy: BackoffPolicy,
        idle_timeout: Duration,
        shutdown: CancellationToken,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            ctx: RelayContext {
                pool,
                client,
                policy,
                idle_timeout,
                shutdown,
                stats: Arc::new(RelayStats::default()),
                lanes: Arc::new(LaneMap::default()),
            },
            tasks,
        }
    }

    fn spawn_lane(&self, user_id: UserId) -> Lane {
        let id = self.ctx.lanes.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let ctx = self.ctx.clone();
        let handle = self.tasks.spawn(run_lane(ctx, user_id, id, receiver));
        debug!(user_id = %user_id, lane = id, "Relay lane started");
        Lane { id, sender, handle }
    }

    fn enqueue(&self, record: ListenRecord) {
        if self.ctx.shutdown.is_cancelled() {
            warn!(
                user_id = %record.user_id,
                listen_id = %record.id,
                "Relay is shut down, listen kept locally only"
            );
            self.ctx.stats.record_dropped();
            return;
        }

        let user_id = record.user_id;
        let mut lanes = self.ctx.lanes.lock();

        let record = match lanes.get(&user_id) {
            Some(lane) => match lane.sender.send(record) {
                Ok(()) => return,
                // Lane task has exited; replace it below
                Err(mpsc::error::SendError(record)) => record,
            },
            None => record,
        };

        let lane = self.spawn_lane(user_id);
        if let Err(mpsc::error::SendError(record)) = lane.sender.send(record) {
            warn!(listen_id = %record.id, "Relay lane closed immediately, listen not relayed");
            self.ctx.stats.record_dropped();
        }
        lanes.insert(user_id, lane);
    }

    async fn flush(&self) {
        let lanes: Vec<Lane> = {
            let mut map = self.ctx.lanes.lock();
            map.drain().map(|(_, lane)| lane).collect()
        };

        for Lane { sender, handle, .. } in lanes {
            drop(sender);
            if let Err(e) = handle.await {
                error!("Relay lane task failed: {}", e);
            }
        }
    }

    fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            delivered: self.ctx.stats.delivered.load(Ordering::Relaxed),
            dropped: self.ctx.stats.dropped.load(Ordering::Relaxed),
            active_lanes: self.ctx.lanes.lock().len(),
        }
    }
}

async fn run_lane(
    ctx: RelayContext,
    user_id: UserId,
    lane_id: u64,
    mut receiver: mpsc::UnboundedReceiver<ListenRecord>,
) {
    loop {
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            next = tokio::time::timeout(ctx.idle_timeout, receiver.recv()) => next,
        };

        let record = match next {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(_idle) => match retire_lane(&ctx.lanes, user_id, lane_id, &mut receiver) {
                Some(record) => record,
                None => break,
            },
        };

        deliver(&ctx, record).await;
    }

    debug!(user_id = %user_id, lane = lane_id, "Relay lane stopped");
}

/// Remove an idle lane from the map unless a listen slipped in meanwhile
///
/// Returns that listen when there is one; the lane keeps running.
fn retire_lane(
    lanes: &LaneMap,
    user_id: UserId,
    lane_id: u64,
    receiver: &mut mpsc::UnboundedReceiver<ListenRecord>,
) -> Option<ListenRecord> {
    let mut map = lanes.lock();
    if let Ok(record) = receiver.try_recv() {
        return Some(record);
    }

    if map.get(&user_id).is_some_and(|lane| lane.id == lane_id) {
        map.remove(&user_id);
    }
    None
}

/// Metadata for a remote submission: the user's token and the track info
async fn load_submission(
    pool: &SqlitePool,
    listen: Listen,
) -> Result<Option<(String, crate::models::TrackInfo)>, scrobsync_common::Error> {
    let Some(user) = users::find_user(pool, listen.user_id).await? else {
        warn!(user_id = %listen.user_id, "User no longer exists, nothing to relay");
        return Ok(None);
    };

    let Some(token) = user.token().map(str::to_string) else {
        warn!(user_id = %listen.user_id, "User has no ListenBrainz token, nothing to relay");
        return Ok(None);
    };

    let Some(track) = catalog::load_track_info(pool, listen.track_id).await? else {
        warn!(track_id = %listen.track_id, "Track no longer exists, nothing to relay");
        return Ok(None);
    };

    Ok(Some((token, track)))
}

async fn deliver(ctx: &RelayContext, record: ListenRecord) {
    let listen = Listen::new(record.user_id, record.track_id);

    let (token, track) = match load_submission(&ctx.pool, listen).await {
        Ok(Some(submission)) => submission,
        Ok(None) => {
            ctx.stats.record_dropped();
            return;
        }
        Err(e) => {
            error!(listen_id = %record.id, "Failed to load listen for relay: {}", e);
            ctx.stats.record_dropped();
            return;
        }
    };

    let outgoing = OutgoingListen {
        listened_at: Some(record.listened_at),
        track,
    };

    let result = retry_with_backoff(
        "submit listen",
        &ctx.policy,
        &ctx.shutdown,
        SyncClientError::is_transport,
        || {
            ctx.client
                .submit_listens(&token, ListenType::Single, std::slice::from_ref(&outgoing))
        },
    )
    .await;

    match result {
        Ok(()) => {
            ctx.stats.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(user_id = %record.user_id, listen_id = %record.id, "Listen relayed");
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            ctx.stats.record_dropped();
            error!(
                user_id = %record.user_id,
                listen_id = %record.id,
                attempts,
                "Dropping listen after repeated relay failures: {}",
                last
            );
        }
        Err(RetryError::Fatal(e)) => {
            ctx.stats.record_dropped();
            error!(
                user_id = %record.user_id,
                listen_id = %record.id,
                "Dropping listen, remote service rejected it: {}",
                e
            );
        }
        Err(RetryError::Cancelled) => {
            debug!(listen_id = %record.id, "Relay cancelled by shutdown");
        }
    }
}

async fn now_playing(ctx: &RelayContext, listen: Listen) {
    let (token, track) = match load_submission(&ctx.pool, listen).await {
        Ok(Some(submission)) => submission,
        Ok(None) => return,
        Err(e) => {
            warn!(user_id = %listen.user_id, "Now playing lookup failed: {}", e);
            return;
        }
    };

    let outgoing = [OutgoingListen {
        listened_at: None,
        track,
    }];

    if let Err(e) = ctx
        .client
        .submit_listens(&token, ListenType::PlayingNow, &outgoing)
        .await
    {
        warn!(user_id = %listen.user_id, track_id = %listen.track_id, "Now playing notification failed: {}", e);
    }
}

impl ListensSynchronizer {
    /// Queue a stored listen for remote delivery
    pub fn enqueue(&self, record: ListenRecord) {
        self.relay.enqueue(record);
    }

    /// Send a "now playing" notification in the background (single attempt)
    pub fn relay_now_playing(&self, listen: Listen) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let ctx = self.relay.ctx.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => {}
                _ = now_playing(&ctx, listen) => {}
            }
        });
    }

    /// Close every lane and wait until queued listens are delivered or dropped
    pub async fn flush_relay(&self) {
        self.relay.flush().await;
    }

    pub fn relay_stats(&self) -> RelaySnapshot {
        self.relay.snapshot()
    }
}
