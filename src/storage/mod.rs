//! Database, upload cache, and user activity

pub mod cache;
pub mod db;
pub mod migrations;
pub mod users;

// Re-exports for convenience
pub use cache::{CacheEntry, CacheStore};
pub use db::{create_pool, get_connection, DbConnection, DbPool};
