//! Apple Music catalog API client.
//!
//! Resolves songs, album track lists and paginated playlist track lists into
//! [`CatalogRecord`]s. When no developer token is configured one is scraped
//! from the web player bundle on first use.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, ORIGIN};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::catalog::{CatalogLookup, CatalogPage, CatalogRecord, Locator, LocatorKind};
use super::error::DownloadError;
use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::retry::{retry, RetryConfig};

const WEB_PLAYER_URL: &str = "https://music.apple.com";
/// Playlist page size accepted by the catalog API
const PAGE_LIMIT: usize = 100;

static INDEX_JS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(assets/index-legacy[~-][^/\x22]+\.js)").expect("index js regex"));
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"eyJh[A-Za-z0-9_\-\.]+").expect("token regex"));

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    data: Vec<Resource>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    attributes: Option<Attributes>,
    relationships: Option<Relationships>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attributes {
    #[serde(default)]
    name: String,
    #[serde(default)]
    artist_name: String,
    album_name: Option<String>,
    #[serde(default)]
    duration_in_millis: u64,
    artwork: Option<Artwork>,
    play_params: Option<PlayParams>,
}

#[derive(Debug, Deserialize)]
struct Artwork {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayParams {
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationships {
    tracks: Option<Document>,
}

impl Resource {
    fn into_record(self) -> CatalogRecord {
        match self.attributes {
            Some(attrs) => CatalogRecord {
                id: self.id,
                play_kind: attrs.play_params.and_then(|p| p.kind).unwrap_or_default(),
                title: attrs.name,
                artist: attrs.artist_name,
                album: attrs.album_name,
                duration_ms: attrs.duration_in_millis,
                cover_url_template: attrs.artwork.and_then(|a| a.url),
                error: None,
            },
            None => CatalogRecord {
                id: self.id,
                error: Some("track is unavailable in this storefront".to_string()),
                ..Default::default()
            },
        }
    }
}

fn page_from_document(doc: Document) -> CatalogPage {
    CatalogPage {
        records: doc.data.into_iter().map(Resource::into_record).collect(),
        next: doc.next,
    }
}

/// Catalog client over HTTPS.
pub struct AppleMusicCatalog {
    client: reqwest::Client,
    base_url: String,
    developer_token: OnceCell<String>,
    media_user_token: Option<String>,
    retry_config: RetryConfig,
}

impl AppleMusicCatalog {
    pub fn new(developer_token: Option<String>, media_user_token: Option<String>) -> AppResult<Self> {
        Self::with_timeout(developer_token, media_user_token, config::catalog::api_timeout())
    }

    /// Like [`AppleMusicCatalog::new`] with a custom per-request timeout.
    pub fn with_timeout(
        developer_token: Option<String>,
        media_user_token: Option<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15")
            .build()?;
        Ok(Self {
            client,
            base_url: config::catalog::API_BASE_URL.to_string(),
            developer_token: OnceCell::new_with(developer_token),
            media_user_token,
            retry_config: RetryConfig::network(),
        })
    }

    /// Points the client at another API host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn resolve_path(locator: &Locator) -> String {
        let sf = &locator.storefront;
        let id = &locator.catalog_id;
        match locator.kind {
            LocatorKind::Song => format!("/v1/catalog/{}/songs/{}", sf, id),
            LocatorKind::Album => format!("/v1/catalog/{}/albums/{}?include=tracks", sf, id),
            LocatorKind::Playlist => format!("/v1/catalog/{}/playlists/{}/tracks?limit={}", sf, id, PAGE_LIMIT),
        }
    }

    /// Absolute URL for an API path or a `next` pointer.
    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn developer_token(&self) -> AppResult<&str> {
        self.developer_token
            .get_or_try_init(|| async {
                log::info!("No catalog token configured, fetching one from the web player");
                scrape_developer_token(&self.client).await
            })
            .await
            .map(String::as_str)
    }

    async fn headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", self.developer_token().await?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| AppError::Config(format!("invalid token: {}", e)))?,
        );
        headers.insert(ORIGIN, HeaderValue::from_static(WEB_PLAYER_URL));
        if let Some(token) = &self.media_user_token {
            let value = HeaderValue::from_str(token)
                .map_err(|e| AppError::Config(format!("invalid media user token: {}", e)))?;
            headers.insert("Media-User-Token", value);
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let headers = self.headers().await?;
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus(status));
        }
        Ok(response.json::<T>().await?)
    }

    async fn fetch_document(&self, path: &str) -> Result<Document, DownloadError> {
        let url = self.absolute(path);
        let outcome = retry(&self.retry_config, || self.get_json::<Document>(&url)).await;
        let attempts = outcome.attempts;
        outcome.into_result().map_err(|e| {
            log::warn!("Catalog request {} failed after {} attempts: {}", url, attempts, e);
            DownloadError::UpstreamUnavailable(e.to_string())
        })
    }
}

#[async_trait]
impl CatalogLookup for AppleMusicCatalog {
    async fn resolve(&self, locator: &Locator) -> Result<CatalogPage, DownloadError> {
        let doc = self.fetch_document(&Self::resolve_path(locator)).await?;
        match locator.kind {
            LocatorKind::Song | LocatorKind::Playlist => Ok(page_from_document(doc)),
            LocatorKind::Album => {
                let tracks = doc
                    .data
                    .into_iter()
                    .next()
                    .and_then(|album| album.relationships)
                    .and_then(|rel| rel.tracks)
                    .ok_or_else(|| {
                        DownloadError::UpstreamUnavailable(format!("album {} has no track list", locator.catalog_id))
                    })?;
                Ok(page_from_document(tracks))
            }
        }
    }

    async fn next_page(&self, next: &str) -> Result<CatalogPage, DownloadError> {
        Ok(page_from_document(self.fetch_document(next).await?))
    }
}

/// Pulls the public developer token out of the web player's JS bundle.
async fn scrape_developer_token(client: &reqwest::Client) -> AppResult<String> {
    let home = client.get(WEB_PLAYER_URL).send().await?.error_for_status()?.text().await?;
    let script = INDEX_JS_RE
        .captures(&home)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::Config("web player bundle not found".to_string()))?;

    let js = client
        .get(format!("{}/{}", WEB_PLAYER_URL, script))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    TOKEN_RE
        .find(&js)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AppError::Config("developer token not found in web player bundle".to_string()))
}
