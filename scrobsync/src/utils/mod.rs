//! Utility modules for the scrobbling engine

pub mod retry;

pub use retry::{retry_on_lock, retry_with_backoff, BackoffPolicy, RetryError};
