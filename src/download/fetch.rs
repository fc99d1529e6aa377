//! Fetch collaborator: produces a local decrypted audio file for one item.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use super::catalog::CatalogItem;
use super::codec::Codec;

/// Typed outcome of one fetch attempt.
///
/// The fallback ladder only advances on `FormatNotAvailable`; implementations
/// classify their raw failures into these variants at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{0} is not available for this track")]
    FormatNotAvailable(Codec),

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("{0}")]
    Unknown(String),
}

/// Fetches and decrypts one catalog item in a given codec.
///
/// Implementations may take minutes. The returned path is owned by the caller,
/// who removes it after upload.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, item: &CatalogItem, codec: Codec) -> Result<PathBuf, FetchError>;
}
