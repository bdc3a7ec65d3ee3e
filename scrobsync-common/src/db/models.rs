//! Identifier and tag types shared by every table

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! declare_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

declare_id!(
    /// Row id of `users`
    UserId
);
declare_id!(
    /// Row id of `tracks`
    TrackId
);
declare_id!(
    /// Row id of `artists`
    ArtistId
);
declare_id!(
    /// Row id of `releases`
    ReleaseId
);
declare_id!(
    /// Row id of `clusters` (grouping tags such as genre or mood)
    ClusterId
);
declare_id!(
    /// Row id of `listens`
    ListenId
);

/// Service a listen was reported through
///
/// Stored as a small integer in `listens.scrobbler`, `users.scrobbler`
/// and `sync_watermarks.scrobbler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrobblerKind {
    /// Local history only, never mirrored
    Internal,
    /// listenbrainz.org (or a compatible server)
    ListenBrainz,
}

impl ScrobblerKind {
    pub const ALL: [ScrobblerKind; 2] = [ScrobblerKind::Internal, ScrobblerKind::ListenBrainz];

    pub fn as_i64(self) -> i64 {
        match self {
            ScrobblerKind::Internal => 0,
            ScrobblerKind::ListenBrainz => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScrobblerKind::Internal => "internal",
            ScrobblerKind::ListenBrainz => "listenbrainz",
        }
    }
}

impl TryFrom<i64> for ScrobblerKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ScrobblerKind::Internal),
            1 => Ok(ScrobblerKind::ListenBrainz),
            other => Err(Error::InvalidInput(format!("unknown scrobbler tag {}", other))),
        }
    }
}

impl fmt::Display for ScrobblerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role under which an artist is credited on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackArtistLinkType {
    Artist,
    ReleaseArtist,
    Composer,
    Conductor,
    Lyricist,
    Mixer,
    Performer,
    Producer,
    Remixer,
    Writer,
}

impl TrackArtistLinkType {
    pub fn as_i64(self) -> i64 {
        match self {
            TrackArtistLinkType::Artist => 0,
            TrackArtistLinkType::ReleaseArtist => 1,
            TrackArtistLinkType::Composer => 2,
            TrackArtistLinkType::Conductor => 3,
            TrackArtistLinkType::Lyricist => 4,
            TrackArtistLinkType::Mixer => 5,
            TrackArtistLinkType::Performer => 6,
            TrackArtistLinkType::Producer => 7,
            TrackArtistLinkType::Remixer => 8,
            TrackArtistLinkType::Writer => 9,
        }
    }
}

impl TryFrom<i64> for TrackArtistLinkType {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        let link = match value {
            0 => TrackArtistLinkType::Artist,
            1 => TrackArtistLinkType::ReleaseArtist,
            2 => TrackArtistLinkType::Composer,
            3 => TrackArtistLinkType::Conductor,
            4 => TrackArtistLinkType::Lyricist,
            5 => TrackArtistLinkType::Mixer,
            6 => TrackArtistLinkType::Performer,
            7 => TrackArtistLinkType::Producer,
            8 => TrackArtistLinkType::Remixer,
            9 => TrackArtistLinkType::Writer,
            other => {
                return Err(Error::InvalidInput(format!("unknown artist link type {}", other)))
            }
        };
        Ok(link)
    }
}
