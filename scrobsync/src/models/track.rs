//! Track metadata exchanged with remote listen-history services

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Descriptive metadata of a track
///
/// Built from the catalog for outbound submissions, and decoded from
/// remote history entries during backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    /// Artist credit as displayed ("A, B")
    pub artist_name: String,
    pub release_name: Option<String>,
    /// MusicBrainz recording id
    pub recording_mbid: Option<Uuid>,
    pub duration: Option<Duration>,
}
