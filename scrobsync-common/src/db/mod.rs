//! Database initialization and shared row types

pub mod init;
pub mod models;

pub use init::*;
pub use models::*;
