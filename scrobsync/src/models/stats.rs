//! Aggregate query parameters

use scrobsync_common::db::{ClusterId, TrackArtistLinkType};
use serde::{Deserialize, Serialize};

/// Narrows aggregate queries (orthogonal to pagination)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsFilter {
    /// A listen counts only if its track belongs to every listed cluster
    pub cluster_ids: Vec<ClusterId>,
    /// Restrict artist credit to one role (artist queries only)
    pub link_type: Option<TrackArtistLinkType>,
}

impl StatsFilter {
    pub fn with_clusters(mut self, cluster_ids: impl IntoIterator<Item = ClusterId>) -> Self {
        self.cluster_ids.extend(cluster_ids);
        self
    }

    pub fn with_link_type(mut self, link_type: TrackArtistLinkType) -> Self {
        self.link_type = Some(link_type);
        self
    }

    /// Cluster ids without duplicates, in ascending order
    pub(crate) fn distinct_clusters(&self) -> Vec<ClusterId> {
        let mut ids = self.cluster_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Entity the listens are grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEntity {
    Artist,
    Release,
    Track,
}

/// Ranking metric, always descending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsMetric {
    /// Number of listens ("top")
    ListenCount,
    /// Most recent listen timestamp ("recent")
    LastListened,
}
