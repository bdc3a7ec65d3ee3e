//! Data models for the scrobbling engine

pub mod listen;
pub mod range;
pub mod stats;
pub mod track;

pub use listen::{Listen, ListenKey, ListenRecord, TimedListen};
pub use range::{Range, RangeResults};
pub use stats::{StatsEntity, StatsFilter, StatsMetric};
pub use track::TrackInfo;
