use thiserror::Error;

use super::codec::Codec;
use crate::core::error::AppError;

/// Structured error type for download operations.
///
/// Item-level variants are caught at the item boundary by the dispatcher and
/// counted as failures; `UpstreamUnavailable` and `InvalidLink` abort a batch
/// before any item work starts; `AuthExpired` aborts the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("link is not a supported catalog URL")]
    InvalidLink,

    #[error("catalog lookup failed: {0}")]
    UpstreamUnavailable(String),

    #[error("no available format (tried: {})", codec_list(.attempted))]
    FormatsExhausted { attempted: Vec<Codec> },

    #[error("no usable codec for {requested} without the decrypt helper")]
    NoUsableCodec { requested: Codec },

    #[error("session expired: {0}")]
    AuthExpired(String),

    #[error("file is too large ({size} bytes, limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("user already has {limit} active downloads")]
    TooManyUserDownloads { limit: usize },

    #[error("server is at capacity")]
    ServerBusy,

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("catalog reported an error for this item: {0}")]
    SourceError(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("storage error: {0}")]
    Storage(String),
}

fn codec_list(codecs: &[Codec]) -> String {
    codecs.iter().map(Codec::as_str).collect::<Vec<_>>().join(", ")
}

impl DownloadError {
    /// Returns subcategory for logs and metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            DownloadError::InvalidLink => "invalid_link",
            DownloadError::UpstreamUnavailable(_) => "upstream_unavailable",
            DownloadError::FormatsExhausted { .. } => "formats_exhausted",
            DownloadError::NoUsableCodec { .. } => "no_usable_codec",
            DownloadError::AuthExpired(_) => "auth_expired",
            DownloadError::FileTooLarge { .. } => "file_too_large",
            DownloadError::TooManyUserDownloads { .. } => "too_many_user_downloads",
            DownloadError::ServerBusy => "server_busy",
            DownloadError::DeliveryFailed(_) => "delivery_failed",
            DownloadError::SourceError(_) => "source_error",
            DownloadError::Fetch(_) => "fetch",
            DownloadError::Storage(_) => "storage",
        }
    }

    /// Whether the rest of the batch must be abandoned.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, DownloadError::AuthExpired(_))
    }

    /// Text shown to the user for a single-item failure.
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::InvalidLink => {
                "Invalid Apple Music URL. Please send a valid song, album, or playlist link.".to_string()
            }
            DownloadError::UpstreamUnavailable(_) => {
                "Unable to fetch song information. Please check the URL and try again.".to_string()
            }
            DownloadError::FormatsExhausted { attempted } => format!(
                "This track is not available in any supported format (tried: {}).",
                codec_list(attempted)
            ),
            DownloadError::NoUsableCodec { requested } => format!(
                "{} needs the decrypt helper, which is not configured. Please contact the administrator.",
                requested
            ),
            DownloadError::AuthExpired(_) => {
                "The bot's Apple Music session has expired. Please contact the administrator.".to_string()
            }
            DownloadError::FileTooLarge { size, limit } => format!(
                "File is too large ({:.1}MB). Maximum size is {}MB.",
                *size as f64 / 1024.0 / 1024.0,
                limit / 1024 / 1024
            ),
            DownloadError::TooManyUserDownloads { limit } => {
                format!("You already have {} active downloads. Please wait.", limit)
            }
            DownloadError::ServerBusy => "Server is at capacity. Please try again in a moment.".to_string(),
            DownloadError::SourceError(msg) => format!("Unable to download this track: {}", msg),
            DownloadError::DeliveryFailed(_) | DownloadError::Fetch(_) | DownloadError::Storage(_) => {
                format!("Download failed: {}", self)
            }
        }
    }
}

impl From<AppError> for DownloadError {
    fn from(err: AppError) -> Self {
        DownloadError::Storage(err.to_string())
    }
}
