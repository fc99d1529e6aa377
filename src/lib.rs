//! Melodura - Telegram bot that downloads Apple Music tracks once and
//! re-sends the cached upload on every later request
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging and retry helpers
//! - `storage`: SQLite pool, migrations, upload cache and user activity
//! - `download`: Link classification, queue building, admission control,
//!   codec fallback and batch dispatch
//! - `telegram`: Telegram bot integration and handlers
//! - `services`: Wiring of the long-lived services

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod core;
pub mod download;
pub mod services;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use download::{BatchResult, Dispatcher, DownloadError};
pub use storage::{create_pool, get_connection, CacheStore, DbConnection, DbPool};
