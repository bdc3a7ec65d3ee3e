//! Test Helper Utilities
//!
//! Shared utilities for scrobsync integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_client;

pub use db_utils::{create_file_db, create_test_db, create_user, seed_track, ts};
pub use fake_client::FakeListenHistoryClient;
