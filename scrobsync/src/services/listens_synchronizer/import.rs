//! Backfill import of remote listen history
//!
//! Per user state machine:
//!
//! ```text
//! Idle -> Fetching -> Importing -> Fetching -> ... -> Idle
//!            |            |
//!            +-> Idle     +-> Idle  (failure, budget reached, cancellation)
//! ```
//!
//! Pages are requested from the stored watermark and merged idempotently.
//! The watermark is written only after every entry of a page has been
//! processed, so an interrupted cycle re-reads at most one page.

use super::ListensSynchronizer;
use crate::db::{catalog, listens, users, watermarks};
use crate::error::{ScrobblingError, ScrobblingResult};
use crate::models::{Listen, ListenKey, TimedListen};
use crate::services::listenbrainz_client::RemoteListen;
use crate::utils::retry_on_lock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use scrobsync_common::db::{ScrobblerKind, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Imports of different users running at once during a periodic cycle
const CONCURRENT_IMPORTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Idle,
    Fetching,
    Importing,
}

/// Counters of one import cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub pages: usize,
    /// Well-formed remote entries received
    pub fetched: usize,
    /// New local listens stored
    pub imported: usize,
    pub already_present: usize,
    /// Entries matching no local track
    pub unresolved: usize,
    pub malformed: usize,
}

impl ImportSummary {
    fn examined(&self) -> usize {
        self.fetched + self.malformed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotListenBrainzUser,
    MissingToken,
    InvalidToken,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ImportOutcome {
    Completed(ImportSummary),
    /// Another import for the same user is in flight
    AlreadyRunning,
    Skipped { reason: SkipReason },
}

/// Per-user in-flight imports
#[derive(Debug, Default)]
pub(super) struct ImportRegistry {
    states: Mutex<HashMap<UserId, ImportState>>,
}

impl ImportRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, ImportState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the user; `None` while another import holds it
    fn try_begin(&self, user_id: UserId) -> Option<ImportGuard<'_>> {
        let mut states = self.lock();
        if states.contains_key(&user_id) {
            return None;
        }
        states.insert(user_id, ImportState::Fetching);
        Some(ImportGuard {
            registry: self,
            user_id,
        })
    }

    fn state(&self, user_id: UserId) -> ImportState {
        self.lock().get(&user_id).copied().unwrap_or(ImportState::Idle)
    }
}

/// Releases the user's import slot on every exit path
struct ImportGuard<'a> {
    registry: &'a ImportRegistry,
    user_id: UserId,
}

impl ImportGuard<'_> {
    fn set(&self, state: ImportState) {
        self.registry.lock().insert(self.user_id, state);
    }
}

impl Drop for ImportGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.user_id);
    }
}

/// Cursor for the page after one spanning `oldest..=newest`
///
/// The service returns listens strictly newer than the cursor. When a full
/// page spans several seconds, listens sharing the newest second may have
/// been cut off by the page limit, so the cursor backs off by one second and
/// the boundary second is read again (re-imports are no-ops).
pub fn next_cursor(oldest: DateTime<Utc>, newest: DateTime<Utc>, page_full: bool) -> DateTime<Utc> {
    if page_full && oldest < newest {
        newest - ChronoDuration::seconds(1)
    } else {
        newest
    }
}

impl ListensSynchronizer {
    /// Current import state of a user
    pub fn import_state(&self, user_id: UserId) -> ImportState {
        self.imports.state(user_id)
    }

    /// Run one import cycle for a user, unless one is already running
    ///
    /// Transport failures end the cycle with an error; the next trigger
    /// resumes from the stored watermark.
    pub async fn trigger_import(&self, user_id: UserId) -> ScrobblingResult<ImportOutcome> {
        if !self.settings.sync_enabled {
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::Disabled,
            });
        }

        let user = users::find_user(&self.pool, user_id)
            .await?
            .ok_or(ScrobblingError::UnknownUser(user_id))?;

        if user.scrobbler != ScrobblerKind::ListenBrainz {
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::NotListenBrainzUser,
            });
        }

        let Some(token) = user.token() else {
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::MissingToken,
            });
        };

        let Some(guard) = self.imports.try_begin(user_id) else {
            debug!(user_id = %user_id, "Import already running");
            return Ok(ImportOutcome::AlreadyRunning);
        };

        let user_name = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ScrobblingError::Cancelled),
            validated = self.client.validate_token(token) => validated?,
        };

        let Some(user_name) = user_name else {
            warn!(user_id = %user_id, "ListenBrainz token rejected, import skipped");
            return Ok(ImportOutcome::Skipped {
                reason: SkipReason::InvalidToken,
            });
        };

        info!(user_id = %user_id, remote_user = %user_name, "Starting listen import");

        let summary = self.import_pages(&guard, user_id, token, &user_name).await?;

        info!(
            user_id = %user_id,
            pages = summary.pages,
            fetched = summary.fetched,
            imported = summary.imported,
            already_present = summary.already_present,
            unresolved = summary.unresolved,
            malformed = summary.malformed,
            "Listen import complete"
        );

        Ok(ImportOutcome::Completed(summary))
    }

    async fn import_pages(
        &self,
        guard: &ImportGuard<'_>,
        user_id: UserId,
        token: &str,
        user_name: &str,
    ) -> ScrobblingResult<ImportSummary> {
        let scrobbler = ScrobblerKind::ListenBrainz;
        let budget = self.settings.max_listens_per_import as usize;
        let mut cursor = watermarks::load_watermark(&self.pool, user_id, scrobbler).await?;
        let mut summary = ImportSummary::default();

        while summary.examined() < budget {
            guard.set(ImportState::Fetching);

            let page = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ScrobblingError::Cancelled),
                page = self.client.fetch_listens(token, user_name, cursor, self.settings.page_size) => page?,
            };

            summary.pages += 1;
            summary.fetched += page.listens.len();
            summary.malformed += page.malformed;

            // Skipped entries still move the cursor, or a page of them would pin it
            let Some((oldest, newest)) = page.time_span() else {
                if page.malformed > 0 {
                    warn!(user_id = %user_id, malformed = page.malformed, "History page has no readable timestamps, stopping import");
                }
                break;
            };

            let mut entries = page.listens;
            entries.sort_by_key(|entry| entry.listened_at);

            guard.set(ImportState::Importing);
            for entry in &entries {
                if self.shutdown.is_cancelled() {
                    // Watermark untouched: the page is re-read next time
                    return Err(ScrobblingError::Cancelled);
                }
                self.import_entry(user_id, entry, &mut summary).await?;
            }

            let next = next_cursor(oldest, newest, page.has_more);

            if cursor.is_some_and(|current| next <= current) {
                warn!(user_id = %user_id, cursor = ?cursor, "History cursor did not advance, stopping import");
                break;
            }

            watermarks::store_watermark(&self.pool, user_id, scrobbler, next).await?;
            cursor = Some(next);

            if !page.has_more {
                break;
            }
        }

        Ok(summary)
    }

    async fn import_entry(
        &self,
        user_id: UserId,
        entry: &RemoteListen,
        summary: &mut ImportSummary,
    ) -> ScrobblingResult<()> {
        let Some(track_id) = catalog::resolve_track(&self.pool, &entry.track).await? else {
            debug!(
                title = %entry.track.title,
                artist = %entry.track.artist_name,
                "No local track for remote listen"
            );
            summary.unresolved += 1;
            return Ok(());
        };

        let timed = TimedListen::new(Listen::new(user_id, track_id), entry.listened_at);
        let key = ListenKey::for_timed(ScrobblerKind::ListenBrainz, &timed);

        if listens::find(&self.pool, &key).await?.is_some() {
            summary.already_present += 1;
            return Ok(());
        }

        let inserted = retry_on_lock("import listen", || {
            listens::add_timed_listen(&self.pool, ScrobblerKind::ListenBrainz, &timed)
        })
        .await?;

        if inserted {
            summary.imported += 1;
        } else {
            summary.already_present += 1;
        }
        Ok(())
    }

    /// Import in the background (login hook)
    pub fn spawn_import(self: &Arc<Self>, user_id: UserId) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            match this.trigger_import(user_id).await {
                Ok(outcome) => debug!(user_id = %user_id, outcome = ?outcome, "Background import finished"),
                Err(ScrobblingError::Cancelled) => debug!(user_id = %user_id, "Background import cancelled"),
                Err(e) => warn!(user_id = %user_id, "Background import failed: {}", e),
            }
        });
    }

    /// One import cycle over every ListenBrainz user with a token
    ///
    /// Returns the number of users whose import completed.
    pub async fn sync_all_users(&self) -> ScrobblingResult<usize> {
        let candidates = users::users_with_scrobbler(&self.pool, ScrobblerKind::ListenBrainz).await?;
        debug!(users = candidates.len(), "Periodic listen sync");

        let completed = stream::iter(candidates)
            .map(|user| async move {
                match self.trigger_import(user.id).await {
                    Ok(ImportOutcome::Completed(_)) => true,
                    Ok(_) => false,
                    Err(ScrobblingError::Cancelled) => false,
                    Err(e) => {
                        warn!(user_id = %user.id, "Listen import failed, retrying next cycle: {}", e);
                        false
                    }
                }
            })
            .buffer_unordered(CONCURRENT_IMPORTS)
            .filter(|done| futures::future::ready(*done))
            .count()
            .await;

        Ok(completed)
    }

    /// Run [`Self::sync_all_users`] every `sync_interval` until shutdown
    pub fn start_periodic_sync(self: &Arc<Self>) {
        if !self.settings.sync_enabled {
            info!("Periodic listen sync disabled");
            return;
        }

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = this.sync_all_users().await {
                    warn!("Periodic listen sync failed: {}", e);
                }
            }

            debug!("Periodic listen sync stopped");
        });

        info!(interval_secs = self.settings.sync_interval.as_secs(), "Periodic listen sync started");
    }
}
