//! Catalog types and the lookup collaborator.

use async_trait::async_trait;
use std::fmt;

use super::error::DownloadError;

pub const CATALOG_HOST: &str = "music.apple.com";

/// Cover art edge length used for thumbnails and cached metadata.
pub const COVER_SIZE: u32 = 1200;

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    Song,
    Album,
    Playlist,
}

impl LocatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorKind::Song => "song",
            LocatorKind::Album => "album",
            LocatorKind::Playlist => "playlist",
        }
    }

    /// Albums and playlists expand to many items.
    pub fn is_collection(&self) -> bool {
        !matches!(self, LocatorKind::Song)
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified catalog link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub kind: LocatorKind,
    pub catalog_id: String,
    /// Two-letter storefront code from the URL path (e.g. "us")
    pub storefront: String,
}

/// One track record as returned by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRecord {
    pub id: String,
    /// Catalog play kind; only "song" entries are queued from collections
    pub play_kind: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub cover_url_template: Option<String>,
    /// Set when the catalog could not resolve this entry
    pub error: Option<String>,
}

impl CatalogRecord {
    pub fn is_song(&self) -> bool {
        self.play_kind == "song"
    }
}

/// One page of a lookup. `next` is the continuation pointer for playlists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    pub records: Vec<CatalogRecord>,
    pub next: Option<String>,
}

/// Catalog collaborator.
///
/// Implementations own their retry budget; an error returned here means the
/// lookup is given up and surfaces as `UpstreamUnavailable`.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// First page for a locator (the single song, the album tracks, or the
    /// first playlist page).
    async fn resolve(&self, locator: &Locator) -> Result<CatalogPage, DownloadError>;

    /// Continuation page behind a `next` pointer.
    async fn next_page(&self, next: &str) -> Result<CatalogPage, DownloadError>;
}

/// One unit of work in a batch. Immutable once the queue is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    /// Kind of the locator this item came from
    pub kind: LocatorKind,
    /// Storefront of the locator this item came from
    pub storefront: String,
    /// 1-based position in the queue
    pub ordinal: usize,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub cover_url_template: Option<String>,
    pub source_error: Option<String>,
}

impl CatalogItem {
    pub fn from_record(record: CatalogRecord, locator: &Locator, ordinal: usize) -> Self {
        Self {
            id: record.id,
            kind: locator.kind,
            storefront: locator.storefront.clone(),
            ordinal,
            title: record.title,
            artist: record.artist,
            album: record.album,
            duration_ms: record.duration_ms,
            cover_url_template: record.cover_url_template,
            source_error: record.error,
        }
    }

    /// Cover URL rendered at the thumbnail size.
    pub fn cover_url(&self) -> Option<String> {
        self.cover_url_template.as_deref().map(|template| render_cover_url(template, COVER_SIZE))
    }

    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            catalog_id: self.id.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            duration_ms: self.duration_ms,
            cover_url: self.cover_url(),
        }
    }

    /// Canonical song URL, as understood by the downloader.
    pub fn song_url(&self) -> String {
        format!("https://{}/{}/song/{}", CATALOG_HOST, self.storefront, self.id)
    }

    /// "Title - Artist" for logs
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.title, self.artist)
    }
}

/// Track fields persisted with a cached upload and used for captions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub catalog_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub cover_url: Option<String>,
}

impl TrackMetadata {
    /// Caption for a fresh upload
    pub fn caption(&self) -> String {
        format!(
            "{} - {}\n{}",
            self.title,
            self.artist,
            self.album.as_deref().unwrap_or_default()
        )
    }

    /// Caption for a re-sent cached upload
    pub fn cached_caption(&self) -> String {
        format!("✓ {} - {} (Cached)", self.title, self.artist)
    }

    pub fn duration_secs(&self) -> u32 {
        u32::try_from(self.duration_ms / 1000).unwrap_or(u32::MAX)
    }
}

/// Fills the `{w}`/`{h}` placeholders of an artwork template.
pub fn render_cover_url(template: &str, size: u32) -> String {
    let size = size.to_string();
    template.replace("{w}", &size).replace("{h}", &size).replace("{f}", "jpg")
}
