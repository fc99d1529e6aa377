//! Common test utilities
//!
//! In-memory collaborators for the dispatcher and queue builder, plus
//! helpers for a throwaway SQLite cache.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use melodura::download::{
    BlobRef, CatalogItem, CatalogLookup, CatalogPage, CatalogRecord, Codec, ConcurrencyGate, Delivery,
    DispatchSettings, Dispatcher, DownloadError, FetchError, Fetcher, Locator, LocatorKind, StatusMessage,
    TrackMetadata, UploadedBlob,
};
use melodura::storage::{create_pool, CacheStore, DbPool};

// ============================================================================
// Fixtures
// ============================================================================

pub fn record(id: &str) -> CatalogRecord {
    CatalogRecord {
        id: id.to_string(),
        play_kind: "song".to_string(),
        title: format!("Track {}", id),
        artist: "Artist".to_string(),
        album: Some("Album".to_string()),
        duration_ms: 180_000,
        cover_url_template: Some("https://is1.mzstatic.com/image/{w}x{h}bb.{f}".to_string()),
        error: None,
    }
}

pub fn locator(kind: LocatorKind, id: &str) -> Locator {
    Locator {
        kind,
        catalog_id: id.to_string(),
        storefront: "us".to_string(),
    }
}

pub fn item(id: &str, ordinal: usize) -> CatalogItem {
    CatalogItem::from_record(record(id), &locator(LocatorKind::Album, "album"), ordinal)
}

pub fn items(count: usize) -> Vec<CatalogItem> {
    (1..=count).map(|n| item(&format!("{}", 1000 + n), n)).collect()
}

pub fn blob(file_id: &str) -> UploadedBlob {
    UploadedBlob {
        file_id: file_id.to_string(),
        file_unique_id: Some(format!("u-{}", file_id)),
        file_size: 1024,
    }
}

/// Cache backed by a fresh database file. Keep the `TempDir` alive.
pub fn temp_cache() -> (TempDir, DbPool, CacheStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    let pool = create_pool(path.to_str().unwrap()).unwrap();
    let cache = CacheStore::new(pool.clone());
    (dir, pool, cache)
}

pub fn dispatch_settings() -> DispatchSettings {
    DispatchSettings {
        preferred_codec: Codec::Alac,
        helper_available: true,
        max_file_size: 50 * 1024 * 1024,
        media_group_limit: 10,
        progress_interval: Duration::from_millis(20),
        max_in_flight: 2,
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub cache: CacheStore,
    pub gate: Arc<ConcurrencyGate>,
    pub fetcher: Arc<MockFetcher>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::with_settings(fetcher, dispatch_settings())
    }

    pub fn with_settings(fetcher: MockFetcher, settings: DispatchSettings) -> Self {
        let (dir, _pool, cache) = temp_cache();
        let gate = Arc::new(ConcurrencyGate::new(2, 5));
        let fetcher = Arc::new(fetcher);
        let dispatcher = Dispatcher::new(cache.clone(), Arc::clone(&gate), fetcher.clone(), settings);
        Self {
            _dir: dir,
            cache,
            gate,
            fetcher,
            dispatcher,
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Scripted fetcher.
///
/// Unscripted `(item, codec)` pairs succeed with a small file. Every attempt is
/// recorded, and the peak number of concurrent fetches is tracked.
pub struct MockFetcher {
    dir: TempDir,
    outcomes: Mutex<HashMap<(String, Codec), Result<usize, FetchError>>>,
    default_size: usize,
    delay: Duration,
    calls: Mutex<Vec<(String, Codec)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            outcomes: Mutex::new(HashMap::new()),
            default_size: 2048,
            delay: Duration::from_millis(5),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.default_size = size;
        self
    }

    pub fn script(self, id: &str, codec: Codec, outcome: Result<usize, FetchError>) -> Self {
        self.outcomes.lock().unwrap().insert((id.to_string(), codec), outcome);
        self
    }

    pub fn calls(&self) -> Vec<(String, Codec)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<Codec> {
        self.calls()
            .into_iter()
            .filter(|(called, _)| called == id)
            .map(|(_, codec)| codec)
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, item: &CatalogItem, codec: Codec) -> Result<PathBuf, FetchError> {
        self.calls.lock().unwrap().push((item.id.clone(), codec));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&(item.id.clone(), codec))
            .cloned()
            .unwrap_or(Ok(self.default_size));

        let result = match outcome {
            Ok(size) => {
                let path = self.dir.path().join(format!("{}-{}.m4a", item.id, codec));
                tokio::fs::write(&path, vec![0u8; size]).await.unwrap();
                Ok(path)
            }
            Err(e) => Err(e),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Catalog with canned first pages (by catalog id) and continuation pages
/// (by `next` pointer).
#[derive(Default)]
pub struct MockCatalog {
    first: HashMap<String, Result<CatalogPage, DownloadError>>,
    continuations: HashMap<String, Result<CatalogPage, DownloadError>>,
    requests: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, catalog_id: &str, page: Result<CatalogPage, DownloadError>) -> Self {
        self.first.insert(catalog_id.to_string(), page);
        self
    }

    pub fn with_next(mut self, next: &str, page: Result<CatalogPage, DownloadError>) -> Self {
        self.continuations.insert(next.to_string(), page);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn page(ids: &[&str], next: Option<&str>) -> CatalogPage {
    CatalogPage {
        records: ids.iter().map(|id| record(id)).collect(),
        next: next.map(str::to_string),
    }
}

#[async_trait]
impl CatalogLookup for MockCatalog {
    async fn resolve(&self, locator: &Locator) -> Result<CatalogPage, DownloadError> {
        self.requests.lock().unwrap().push(locator.catalog_id.clone());
        self.first
            .get(&locator.catalog_id)
            .cloned()
            .unwrap_or_else(|| Err(DownloadError::UpstreamUnavailable("not found".to_string())))
    }

    async fn next_page(&self, next: &str) -> Result<CatalogPage, DownloadError> {
        self.requests.lock().unwrap().push(next.to_string());
        self.continuations
            .get(next)
            .cloned()
            .unwrap_or_else(|| Err(DownloadError::UpstreamUnavailable("not found".to_string())))
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Artifact { catalog_id: String },
    Cached { file_id: String, catalog_id: String },
    Group(Vec<(String, BlobRef)>),
}

/// Records every send. Uploads return `file-<catalog id>` handles.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<Sent>>,
    fail_artifacts: Vec<String>,
    fail_group: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_artifact(mut self, catalog_id: &str) -> Self {
        self.fail_artifacts.push(catalog_id.to_string());
        self
    }

    pub fn failing_group(mut self) -> Self {
        self.fail_group = true;
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn uploaded(catalog_id: &str) -> UploadedBlob {
        blob(&format!("file-{}", catalog_id))
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send_artifact(&self, path: &Path, track: &TrackMetadata) -> Result<UploadedBlob, DownloadError> {
        assert!(path.exists(), "artifact must exist while it is uploaded");
        if self.fail_artifacts.contains(&track.catalog_id) {
            return Err(DownloadError::DeliveryFailed("upload rejected".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Artifact {
            catalog_id: track.catalog_id.clone(),
        });
        Ok(Self::uploaded(&track.catalog_id))
    }

    async fn send_cached(&self, file_id: &str, track: &TrackMetadata) -> Result<(), DownloadError> {
        self.sent.lock().unwrap().push(Sent::Cached {
            file_id: file_id.to_string(),
            catalog_id: track.catalog_id.clone(),
        });
        Ok(())
    }

    async fn send_group(&self, entries: &[(TrackMetadata, BlobRef)]) -> Result<Vec<UploadedBlob>, DownloadError> {
        if self.fail_group {
            return Err(DownloadError::DeliveryFailed("group rejected".to_string()));
        }
        self.sent.lock().unwrap().push(Sent::Group(
            entries
                .iter()
                .map(|(track, blob_ref)| (track.catalog_id.clone(), blob_ref.clone()))
                .collect(),
        ));
        Ok(entries
            .iter()
            .map(|(track, blob_ref)| match blob_ref {
                BlobRef::Remote(file_id) => blob(file_id),
                BlobRef::Local(_) => Self::uploaded(&track.catalog_id),
            })
            .collect())
    }
}

/// Status message that keeps every text it was given.
#[derive(Default)]
pub struct RecordingStatus {
    updates: Mutex<Vec<String>>,
    deleted: Mutex<bool>,
}

impl RecordingStatus {
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }

    pub fn is_deleted(&self) -> bool {
        *self.deleted.lock().unwrap()
    }
}

#[async_trait]
impl StatusMessage for RecordingStatus {
    async fn update(&self, text: &str) {
        self.updates.lock().unwrap().push(text.to_string());
    }

    async fn delete(&self) {
        *self.deleted.lock().unwrap() = true;
    }
}
