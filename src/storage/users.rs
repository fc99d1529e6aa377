//! Per-user activity counters (observability only, never used for admission).

use rusqlite::OptionalExtension;

use super::db::{get_connection, DbPool};
use crate::core::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserActivity {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_activity_at: Option<String>,
    pub download_count: i64,
}

/// Records one request from a user.
///
/// Upsert on `user_id`: refreshes the names and activity time and increments
/// `download_count`.
pub fn record_activity(pool: &DbPool, user_id: i64, username: Option<&str>, first_name: Option<&str>) -> AppResult<()> {
    let conn = get_connection(pool)?;
    conn.execute(
        "INSERT INTO users (user_id, username, first_name, last_activity_at, download_count)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP, 1)
         ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            first_name = excluded.first_name,
            last_activity_at = CURRENT_TIMESTAMP,
            download_count = download_count + 1",
        rusqlite::params![user_id, username, first_name],
    )?;
    Ok(())
}

/// Gets the activity row for a user, if any.
pub fn get_activity(pool: &DbPool, user_id: i64) -> AppResult<Option<UserActivity>> {
    let conn = get_connection(pool)?;
    Ok(conn
        .query_row(
            "SELECT user_id, username, first_name, last_activity_at, download_count
             FROM users WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(UserActivity {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    first_name: row.get(2)?,
                    last_activity_at: row.get(3)?,
                    download_count: row.get(4)?,
                })
            },
        )
        .optional()?)
}
