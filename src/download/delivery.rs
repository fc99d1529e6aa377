//! Delivery collaborators: sending audio to the requesting chat and keeping a
//! status message up to date.
//!
//! Both are bound to one chat by the caller. Implementations must not retry
//! binary uploads on their own; re-sending a cached handle is cheap and may be
//! retried.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::catalog::TrackMetadata;
use super::error::DownloadError;

/// Handle returned by the chat platform for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub file_id: String,
    pub file_unique_id: Option<String>,
    pub file_size: u64,
}

/// Audio to put in a grouped send: either already uploaded or a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobRef {
    Remote(String),
    Local(PathBuf),
}

impl BlobRef {
    pub fn is_local(&self) -> bool {
        matches!(self, BlobRef::Local(_))
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Uploads a local file as audio.
    async fn send_artifact(&self, path: &Path, track: &TrackMetadata) -> Result<UploadedBlob, DownloadError>;

    /// Re-sends an already uploaded file by handle.
    async fn send_cached(&self, file_id: &str, track: &TrackMetadata) -> Result<(), DownloadError>;

    /// Sends several tracks as grouped audio.
    ///
    /// Returns one blob per entry, in entry order.
    async fn send_group(&self, entries: &[(TrackMetadata, BlobRef)]) -> Result<Vec<UploadedBlob>, DownloadError>;
}

/// Editable status message. Best-effort: failures are logged, never raised.
#[async_trait]
pub trait StatusMessage: Send + Sync {
    async fn update(&self, text: &str);
    async fn delete(&self);
}
