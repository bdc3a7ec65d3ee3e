//! # scrobsync common library
//!
//! Shared code for the scrobbling engine:
//! - Error type
//! - Configuration loading and root folder resolution
//! - SQLite initialization, schema and identifier types
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
