//! Error types for the scrobbling engine
//!
//! Only local persistence failures reach playback callers. Remote failures
//! are absorbed by the synchronizer (retried, then logged and dropped).

use crate::services::listenbrainz_client::SyncClientError;
use scrobsync_common::db::{ScrobblerKind, TrackId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrobblingError {
    /// Listen store / catalog failure
    #[error(transparent)]
    Storage(#[from] scrobsync_common::Error),

    /// Remote listen-history service failure
    #[error("Remote service error: {0}")]
    Remote(#[from] SyncClientError),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("No scrobbler registered for {0}")]
    NoScrobbler(ScrobblerKind),

    /// Shutdown requested while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for ScrobblingError {
    fn from(err: sqlx::Error) -> Self {
        ScrobblingError::Storage(err.into())
    }
}

/// Result type for engine operations
pub type ScrobblingResult<T> = Result<T, ScrobblingError>;
