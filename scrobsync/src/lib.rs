//! scrobsync library interface
//!
//! Listen history engine: records completed playbacks per user, answers
//! paginated statistics over them, and keeps them in sync with a remote
//! listen-history service (ListenBrainz).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::EngineSettings;
pub use crate::error::{ScrobblingError, ScrobblingResult};
pub use crate::services::ScrobblingService;
