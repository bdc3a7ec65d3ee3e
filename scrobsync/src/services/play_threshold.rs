//! Minimum play duration for a finished playback to count as a listen

use scrobsync_common::config::PlayThresholdConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayThreshold {
    /// Every finished playback counts
    #[default]
    Always,
    /// Played at least this long
    Fixed(Duration),
    /// Played at least half the track, or the cap, whichever is smaller
    HalfTrackCapped(Duration),
}

impl PlayThreshold {
    /// Whether a playback of `played` counts
    ///
    /// An unknown play duration always counts. With an unknown track
    /// duration `HalfTrackCapped` falls back to the cap alone.
    pub fn counts(&self, played: Option<Duration>, track_duration: Option<Duration>) -> bool {
        let Some(played) = played else {
            return true;
        };

        match *self {
            PlayThreshold::Always => true,
            PlayThreshold::Fixed(min) => played >= min,
            PlayThreshold::HalfTrackCapped(cap) => {
                let required = track_duration.map_or(cap, |d| (d / 2).min(cap));
                played >= required
            }
        }
    }
}

impl From<&PlayThresholdConfig> for PlayThreshold {
    fn from(config: &PlayThresholdConfig) -> Self {
        match *config {
            PlayThresholdConfig::Always => PlayThreshold::Always,
            PlayThresholdConfig::Fixed { seconds } => PlayThreshold::Fixed(Duration::from_secs(seconds)),
            PlayThresholdConfig::HalfTrackCapped { cap_seconds } => {
                PlayThreshold::HalfTrackCapped(Duration::from_secs(cap_seconds))
            }
        }
    }
}
