//! Persistent upload cache keyed by catalog track ID.
//!
//! Once a track has been uploaded, Telegram hands back a `file_id` that can be
//! re-sent any number of times without transferring the bytes again. This table
//! maps the catalog's stable ID to that handle, so a popular track is fetched,
//! decrypted and uploaded exactly once.

use rusqlite::OptionalExtension;

use super::db::{get_connection, DbPool};
use crate::core::error::AppResult;
use crate::download::catalog::TrackMetadata;
use crate::download::delivery::UploadedBlob;

/// A cached upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Catalog track ID (unique)
    pub catalog_id: String,
    /// Telegram file_id, re-sendable without re-uploading
    pub file_id: String,
    /// Telegram file_unique_id
    pub file_unique_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: i64,
    pub cover_url: Option<String>,
    /// Uploaded size in bytes
    pub file_size: i64,
    pub created_at: String,
    pub last_accessed_at: String,
    /// Number of cache hits served
    pub access_count: i64,
}

impl CacheEntry {
    /// Metadata used for captions when re-sending.
    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            catalog_id: self.catalog_id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            duration_ms: u64::try_from(self.duration_ms).unwrap_or(0),
            cover_url: self.cover_url.clone(),
        }
    }
}

const ENTRY_COLUMNS: &str = "catalog_id, file_id, file_unique_id, title, artist, album, duration_ms, cover_url, \
                             file_size, created_at, last_accessed_at, access_count";

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        catalog_id: row.get(0)?,
        file_id: row.get(1)?,
        file_unique_id: row.get(2)?,
        title: row.get(3)?,
        artist: row.get(4)?,
        album: row.get(5)?,
        duration_ms: row.get(6)?,
        cover_url: row.get(7)?,
        file_size: row.get(8)?,
        created_at: row.get(9)?,
        last_accessed_at: row.get(10)?,
        access_count: row.get(11)?,
    })
}

/// SQLite-backed upload cache.
#[derive(Clone)]
pub struct CacheStore {
    pool: DbPool,
}

impl CacheStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Looks up a track and records the hit.
    ///
    /// A hit bumps `access_count` and `last_accessed_at` in the same statement
    /// that reads the row, so the returned entry already reflects this access.
    ///
    /// # Returns
    ///
    /// `Ok(None)` on a miss.
    pub fn get(&self, catalog_id: &str) -> AppResult<Option<CacheEntry>> {
        let conn = get_connection(&self.pool)?;
        let sql = format!(
            "UPDATE tracks
             SET access_count = access_count + 1, last_accessed_at = CURRENT_TIMESTAMP
             WHERE catalog_id = ?1
             RETURNING {}",
            ENTRY_COLUMNS
        );
        let entry = conn
            .query_row(&sql, rusqlite::params![catalog_id], entry_from_row)
            .optional()?;

        match entry {
            Some(ref e) => log::debug!("Cache hit for {} (access #{})", catalog_id, e.access_count),
            None => log::debug!("Cache miss for {}", catalog_id),
        }
        Ok(entry)
    }

    /// Reads an entry without touching the access bookkeeping.
    pub fn peek(&self, catalog_id: &str) -> AppResult<Option<CacheEntry>> {
        let conn = get_connection(&self.pool)?;
        let sql = format!("SELECT {} FROM tracks WHERE catalog_id = ?1", ENTRY_COLUMNS);
        Ok(conn
            .query_row(&sql, rusqlite::params![catalog_id], entry_from_row)
            .optional()?)
    }

    /// Stores an upload for a track.
    ///
    /// Upsert on `catalog_id`: a later upload for the same track replaces the
    /// handle, unique ID and size, and refreshes the touch time. Concurrent writers
    /// for one ID converge to a single row (last writer wins).
    pub fn put(&self, track: &TrackMetadata, blob: &UploadedBlob) -> AppResult<()> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "INSERT INTO tracks (
                catalog_id, title, artist, album, duration_ms, cover_url,
                file_id, file_unique_id, file_size
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(catalog_id) DO UPDATE SET
                file_id = excluded.file_id,
                file_unique_id = excluded.file_unique_id,
                file_size = excluded.file_size,
                last_accessed_at = CURRENT_TIMESTAMP",
            rusqlite::params![
                track.catalog_id,
                track.title,
                track.artist,
                track.album,
                i64::try_from(track.duration_ms).unwrap_or(i64::MAX),
                track.cover_url,
                blob.file_id,
                blob.file_unique_id,
                i64::try_from(blob.file_size).unwrap_or(i64::MAX),
            ],
        )?;
        log::debug!("Cached upload for {} ({} bytes)", track.catalog_id, blob.file_size);
        Ok(())
    }

    /// Number of cached tracks.
    pub fn count(&self) -> AppResult<i64> {
        let conn = get_connection(&self.pool)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?)
    }
}
