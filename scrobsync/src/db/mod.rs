//! Database access for the scrobbling engine
//!
//! Schema creation and pool setup live in `scrobsync_common::db`; this module
//! holds the queries. Every function takes the pool explicitly.

pub mod catalog;
pub mod listens;
pub mod users;
pub mod watermarks;

pub use catalog::NewTrack;
pub use users::User;
