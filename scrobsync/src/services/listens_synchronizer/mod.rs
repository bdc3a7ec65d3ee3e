//! Listens synchronizer
//!
//! Keeps the local listen log and a remote listen-history service consistent:
//!
//! - **Outbound relay** ([`relay`]): finished listens are forwarded in the
//!   background, one FIFO lane per user, retried with exponential backoff
//!   and dropped once the attempt budget is spent. The local record is
//!   already durable at that point.
//! - **Backfill** ([`import`]): remote history is fetched page by page from
//!   a per-user watermark and merged idempotently into the local log.
//!
//! All background work is spawned on one `TaskTracker` and observes one
//! shutdown token, so [`ListensSynchronizer::shutdown`] cancels in-flight
//! network calls and waits for every task to finish.

pub mod import;
pub mod relay;

pub use import::{ImportOutcome, ImportState, ImportSummary, SkipReason};
pub use relay::RelaySnapshot;

use crate::services::listenbrainz_client::ListenHistoryClient;
use crate::utils::BackoffPolicy;
use import::ImportRegistry;
use relay::Relay;
use scrobsync_common::config::{ListenBrainzConfig, RelayConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Synchronizer tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizerSettings {
    /// Listens requested per history page
    pub page_size: u32,
    /// Remote entries examined per import cycle
    pub max_listens_per_import: u32,
    pub sync_interval: Duration,
    /// When false, imports are skipped; the relay still runs
    pub sync_enabled: bool,
    pub relay: BackoffPolicy,
    /// A relay lane with nothing queued for this long exits
    pub lane_idle_timeout: Duration,
}

impl SynchronizerSettings {
    pub fn from_config(listenbrainz: &ListenBrainzConfig, relay: &RelayConfig) -> Self {
        Self {
            page_size: listenbrainz.page_size.max(1),
            max_listens_per_import: listenbrainz.max_listens_per_import,
            sync_interval: Duration::from_secs(listenbrainz.sync_interval_secs.max(1)),
            sync_enabled: listenbrainz.sync_enabled,
            relay: BackoffPolicy::from(relay),
            lane_idle_timeout: Duration::from_secs(relay.lane_idle_secs.max(1)),
        }
    }
}

impl Default for SynchronizerSettings {
    fn default() -> Self {
        Self::from_config(&ListenBrainzConfig::default(), &RelayConfig::default())
    }
}

pub struct ListensSynchronizer {
    pool: SqlitePool,
    client: Arc<dyn ListenHistoryClient>,
    settings: SynchronizerSettings,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    relay: Relay,
    imports: ImportRegistry,
}

impl ListensSynchronizer {
    pub fn new(
        pool: SqlitePool,
        client: Arc<dyn ListenHistoryClient>,
        settings: SynchronizerSettings,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        let relay = Relay::new(
            pool.clone(),
            Arc::clone(&client),
            settings.relay,
            settings.lane_idle_timeout,
            shutdown.clone(),
            tasks.clone(),
        );

        Self {
            pool,
            client,
            settings,
            shutdown,
            tasks,
            relay,
            imports: ImportRegistry::default(),
        }
    }

    pub fn settings(&self) -> &SynchronizerSettings {
        &self.settings
    }

    /// Cancel in-flight work and wait for every background task
    ///
    /// Pending relay items are dropped; their listens stay in the local log.
    /// An interrupted import leaves the watermark at the last complete page.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down listens synchronizer");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Listens synchronizer stopped");
    }
}
