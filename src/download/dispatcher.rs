//! Runs one batch of catalog items: cache lookup, admission, fetch, upload.
//!
//! Per item:
//!
//! ```text
//! PENDING ──cache hit──▶ CACHE_HIT (re-send handle)
//!    │
//!    └─miss─▶ ADMITTED ─▶ FETCHING ─▶ DELIVERED | FAILED
//! ```
//!
//! An item failure never stops its siblings, except `AuthExpired`, after which
//! every item that has not started fetching fails without touching the fetcher.

use futures_util::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::catalog::{CatalogItem, TrackMetadata};
use super::codec::{fetch_with_fallback, Codec};
use super::delivery::{BlobRef, Delivery, StatusMessage, UploadedBlob};
use super::error::DownloadError;
use super::fetch::Fetcher;
use super::gate::ConcurrencyGate;
use crate::core::config::limits::MEDIA_GROUP_LIMIT;
use crate::core::config::Settings;
use crate::storage::{CacheEntry, CacheStore};

/// Knobs for batch execution.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub preferred_codec: Codec,
    /// Whether codecs needing the decrypt helper may be attempted
    pub helper_available: bool,
    /// Upload ceiling in bytes
    pub max_file_size: u64,
    /// Largest batch delivered as one media group (batches of 2..=this)
    pub media_group_limit: usize,
    pub progress_interval: Duration,
    /// Items of one batch in flight at once
    pub max_in_flight: usize,
}

impl DispatchSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            preferred_codec: settings.preferred_codec,
            helper_available: settings.decrypt_helper_url.is_some(),
            max_file_size: settings.max_file_size,
            media_group_limit: MEDIA_GROUP_LIMIT,
            progress_interval: settings.progress_interval,
            // One batch must not trip its own per-user ceiling
            max_in_flight: settings.max_per_user.max(1),
        }
    }
}

/// One failed item and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: CatalogItem,
    pub error: DownloadError,
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
    /// Entries sent as one media group, in queue order
    pub grouped: Vec<(CatalogItem, BlobRef)>,
    /// Batch-fatal error that stopped the remaining items
    pub aborted: Option<DownloadError>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }

    /// Final status text for multi-item batches.
    pub fn summary(&self) -> String {
        format!("Completed! Processed: {}, Failed: {}", self.processed, self.failed)
    }
}

fn progress_text(processed: usize, failed: usize, total: usize) -> String {
    format!(
        "Progress: {}/{} (Processed: {}, Failed: {})",
        processed + failed,
        total,
        processed,
        failed
    )
}

/// Result of one item before grouped delivery is resolved.
enum ItemOutcome {
    Delivered,
    Grouped(BlobRef),
    Failed(DownloadError),
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
}

pub struct Dispatcher {
    cache: CacheStore,
    gate: Arc<ConcurrencyGate>,
    fetcher: Arc<dyn Fetcher>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        cache: CacheStore,
        gate: Arc<ConcurrencyGate>,
        fetcher: Arc<dyn Fetcher>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            cache,
            gate,
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Processes every item of a batch for `user_id`.
    ///
    /// Items run concurrently; completion order is unspecified. When `status`
    /// is given, a background task posts progress every `progress_interval`
    /// until the batch ends.
    pub async fn run_batch(
        &self,
        user_id: i64,
        items: Vec<CatalogItem>,
        delivery: &dyn Delivery,
        status: Option<Arc<dyn StatusMessage>>,
    ) -> BatchResult {
        let total = items.len();
        let grouped_mode = total >= 2 && total <= self.settings.media_group_limit;
        let counters = Arc::new(Counters::default());
        let abort: OnceLock<DownloadError> = OnceLock::new();

        log::info!(
            "Batch for user {}: {} items{}",
            user_id,
            total,
            if grouped_mode { " (grouped)" } else { "" }
        );

        let cancel = CancellationToken::new();
        let progress = status.map(|status| {
            tokio::spawn(report_progress(
                status,
                Arc::clone(&counters),
                total,
                self.settings.progress_interval,
                cancel.clone(),
            ))
        });

        let outcomes: Vec<(CatalogItem, ItemOutcome)> = stream::iter(items)
            .map(|item| {
                let counters = Arc::clone(&counters);
                let abort = &abort;
                async move {
                    let outcome = self.run_item(user_id, &item, total, delivery, grouped_mode, abort).await;
                    match &outcome {
                        ItemOutcome::Delivered => {
                            counters.processed.fetch_add(1, Ordering::Relaxed);
                        }
                        ItemOutcome::Failed(_) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                        ItemOutcome::Grouped(_) => {}
                    }
                    (item, outcome)
                }
            })
            .buffer_unordered(self.settings.max_in_flight.max(1))
            .collect()
            .await;

        let mut result = BatchResult::default();
        let mut grouped = Vec::new();
        for (item, outcome) in outcomes {
            match outcome {
                ItemOutcome::Delivered => result.processed += 1,
                ItemOutcome::Failed(error) => {
                    result.failed += 1;
                    result.failures.push(ItemFailure { item, error });
                }
                ItemOutcome::Grouped(blob) => grouped.push((item, blob)),
            }
        }

        if !grouped.is_empty() {
            grouped.sort_by_key(|(item, _)| item.ordinal);
            self.deliver_group(&grouped, delivery, &mut result).await;
            for (_, blob) in &grouped {
                if let BlobRef::Local(path) = blob {
                    remove_artifact(path).await;
                }
            }
            result.grouped = grouped;
        }

        result.failures.sort_by_key(|failure| failure.item.ordinal);
        result.aborted = abort.into_inner();

        cancel.cancel();
        if let Some(handle) = progress {
            // The reporter exits on cancellation; a join error only means it panicked
            if let Err(e) = handle.await {
                log::warn!("Progress reporter ended abnormally: {}", e);
            }
        }

        log::info!(
            "Batch for user {} finished: processed {}, failed {}{}",
            user_id,
            result.processed,
            result.failed,
            if result.aborted.is_some() { " (aborted)" } else { "" }
        );
        result
    }

    async fn run_item(
        &self,
        user_id: i64,
        item: &CatalogItem,
        total: usize,
        delivery: &dyn Delivery,
        grouped_mode: bool,
        abort: &OnceLock<DownloadError>,
    ) -> ItemOutcome {
        match self.process_item(user_id, item, delivery, grouped_mode, abort).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if error.is_batch_fatal() && abort.set(error.clone()).is_ok() {
                    log::error!("Batch for user {} aborted: {}", user_id, error);
                }
                log::warn!(
                    "Item {}/{} {} ({}) failed [{}]: {}",
                    item.ordinal,
                    total,
                    item.id,
                    item.display_name(),
                    error.subcategory(),
                    error
                );
                ItemOutcome::Failed(error)
            }
        }
    }

    async fn process_item(
        &self,
        user_id: i64,
        item: &CatalogItem,
        delivery: &dyn Delivery,
        grouped_mode: bool,
        abort: &OnceLock<DownloadError>,
    ) -> Result<ItemOutcome, DownloadError> {
        if let Some(fatal) = abort.get() {
            return Err(fatal.clone());
        }
        if let Some(reason) = &item.source_error {
            return Err(DownloadError::SourceError(reason.clone()));
        }

        if let Some(entry) = self.cached(&item.id) {
            if grouped_mode {
                return Ok(ItemOutcome::Grouped(BlobRef::Remote(entry.file_id)));
            }
            delivery.send_cached(&entry.file_id, &entry.metadata()).await?;
            return Ok(ItemOutcome::Delivered);
        }

        let permit = self.gate.acquire(user_id)?;
        let fetched = fetch_with_fallback(
            self.fetcher.as_ref(),
            item,
            self.settings.preferred_codec,
            self.settings.helper_available,
        )
        .await;
        permit.release();
        let (path, codec) = fetched?;
        log::debug!("Fetched {} as {} to {}", item.id, codec, path.display());

        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                remove_artifact(&path).await;
                return Err(DownloadError::Fetch(format!("fetched file unreadable: {}", e)));
            }
        };
        if size > self.settings.max_file_size {
            remove_artifact(&path).await;
            return Err(DownloadError::FileTooLarge {
                size,
                limit: self.settings.max_file_size,
            });
        }

        if grouped_mode {
            return Ok(ItemOutcome::Grouped(BlobRef::Local(path)));
        }

        let track = item.metadata();
        let sent = delivery.send_artifact(&path, &track).await;
        remove_artifact(&path).await;
        let blob = sent?;
        self.remember(&track, &blob);
        Ok(ItemOutcome::Delivered)
    }

    /// Sends the grouped entries and caches fresh uploads.
    async fn deliver_group(
        &self,
        grouped: &[(CatalogItem, BlobRef)],
        delivery: &dyn Delivery,
        result: &mut BatchResult,
    ) {
        let entries: Vec<(TrackMetadata, BlobRef)> = grouped
            .iter()
            .map(|(item, blob)| (item.metadata(), blob.clone()))
            .collect();

        match delivery.send_group(&entries).await {
            Ok(blobs) => {
                for ((track, blob_ref), uploaded) in entries.iter().zip(blobs.iter()) {
                    if blob_ref.is_local() {
                        self.remember(track, uploaded);
                    }
                }
                result.processed += grouped.len();
            }
            Err(error) => {
                log::warn!("Grouped delivery of {} items failed: {}", grouped.len(), error);
                result.failed += grouped.len();
                result.failures.extend(grouped.iter().map(|(item, _)| ItemFailure {
                    item: item.clone(),
                    error: error.clone(),
                }));
            }
        }
    }

    /// Cache read that degrades to a miss on storage errors.
    fn cached(&self, catalog_id: &str) -> Option<CacheEntry> {
        match self.cache.get(catalog_id) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cache lookup for {} failed, treating as miss: {}", catalog_id, e);
                None
            }
        }
    }

    /// Cache write after a successful upload. The user already has the file,
    /// so a storage error only costs a future re-fetch.
    fn remember(&self, track: &TrackMetadata, blob: &UploadedBlob) {
        if let Err(e) = self.cache.put(track, blob) {
            log::warn!("Failed to cache upload for {}: {}", track.catalog_id, e);
        }
    }
}

async fn report_progress(
    status: Arc<dyn StatusMessage>,
    counters: Arc<Counters>,
    total: usize,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let processed = counters.processed.load(Ordering::Relaxed);
                let failed = counters.failed.load(Ordering::Relaxed);
                if processed + failed >= total {
                    break;
                }
                status.update(&progress_text(processed, failed, total)).await;
            }
        }
    }
}

async fn remove_artifact(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
