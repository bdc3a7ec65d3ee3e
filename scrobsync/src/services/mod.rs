//! Scrobbling services
//!
//! - [`scrobbling_service`]: dispatches playback events per user
//! - [`scrobbler`]: per-service event handling
//! - [`listens_synchronizer`]: outbound relay and backfill import
//! - [`listenbrainz_client`]: remote listen-history API

pub mod listenbrainz_client;
pub mod listens_synchronizer;
pub mod play_threshold;
pub mod scrobbler;
pub mod scrobbling_service;

pub use listenbrainz_client::{
    ClientSettings, ListenBrainzClient, ListenHistoryClient, ListenType, ListensPage,
    OutgoingListen, RemoteListen, SyncClientError,
};
pub use listens_synchronizer::{
    ImportOutcome, ImportState, ImportSummary, ListensSynchronizer, RelaySnapshot, SkipReason,
    SynchronizerSettings,
};
pub use play_threshold::PlayThreshold;
pub use scrobbler::{InternalScrobbler, ListenBrainzScrobbler, Scrobbler};
pub use scrobbling_service::ScrobblingService;
