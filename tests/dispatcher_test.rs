//! Integration tests for batch dispatch (cache, admission, fallback, delivery)
//!
//! Run with: cargo test --test dispatcher_test

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{blob, dispatch_settings, item, items, Harness, MockFetcher, RecordingDelivery, RecordingStatus, Sent};
use melodura::download::{
    BlobRef, Codec, ConcurrencyGate, Delivery, DownloadError, FetchError, StatusMessage, TrackMetadata, UploadedBlob,
};

const USER: i64 = 42;

fn files_left(fetcher: &MockFetcher) -> usize {
    std::fs::read_dir(fetcher.dir()).unwrap().count()
}

/// Records gate occupancy at the moment each upload starts.
struct GateWatchingDelivery {
    gate: Arc<ConcurrencyGate>,
    seen: Mutex<Vec<(usize, usize)>>,
}

impl GateWatchingDelivery {
    fn new(gate: Arc<ConcurrencyGate>) -> Self {
        Self {
            gate,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn record(&self) {
        self.seen
            .lock()
            .unwrap()
            .push((self.gate.active_for(USER), self.gate.active_global()));
    }

    fn seen(&self) -> Vec<(usize, usize)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for GateWatchingDelivery {
    async fn send_artifact(&self, _path: &Path, track: &TrackMetadata) -> Result<UploadedBlob, DownloadError> {
        self.record();
        Ok(blob(&format!("file-{}", track.catalog_id)))
    }

    async fn send_cached(&self, _file_id: &str, _track: &TrackMetadata) -> Result<(), DownloadError> {
        Ok(())
    }

    async fn send_group(&self, entries: &[(TrackMetadata, BlobRef)]) -> Result<Vec<UploadedBlob>, DownloadError> {
        self.record();
        Ok(entries
            .iter()
            .map(|(track, _)| blob(&format!("file-{}", track.catalog_id)))
            .collect())
    }
}

// ============================================================================
// Single item
// ============================================================================

#[tokio::test]
async fn test_cache_hit_skips_fetch_and_bumps_access_count() {
    let h = Harness::new(MockFetcher::new());
    let track = item("1001", 1);
    h.cache.put(&track.metadata(), &blob("cached-1001")).unwrap();

    let delivery = RecordingDelivery::new();
    let result = h.dispatcher.run_batch(USER, vec![track], &delivery, None).await;

    assert_eq!(result.processed, 1);
    assert_eq!(result.failed, 0);
    assert!(h.fetcher.calls().is_empty());
    assert_eq!(
        delivery.sent(),
        vec![Sent::Cached {
            file_id: "cached-1001".to_string(),
            catalog_id: "1001".to_string(),
        }]
    );
    assert_eq!(h.cache.peek("1001").unwrap().unwrap().access_count, 1);
}

#[tokio::test]
async fn test_miss_fetches_uploads_and_caches() {
    let h = Harness::new(MockFetcher::new());
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.processed, 1);
    assert_eq!(h.fetcher.calls_for("1001"), vec![Codec::Alac]);
    assert_eq!(
        delivery.sent(),
        vec![Sent::Artifact {
            catalog_id: "1001".to_string()
        }]
    );
    let entry = h.cache.peek("1001").unwrap().unwrap();
    assert_eq!(entry.file_id, "file-1001");
    assert_eq!(entry.title, "Track 1001");
    assert_eq!(files_left(&h.fetcher), 0);

    // Second request is served from the cache
    let again = RecordingDelivery::new();
    h.dispatcher.run_batch(USER, vec![item("1001", 1)], &again, None).await;
    assert_eq!(h.fetcher.calls().len(), 1);
    assert!(matches!(&again.sent()[..], [Sent::Cached { .. }]));
}

#[tokio::test]
async fn test_gate_slot_is_free_before_upload_starts() {
    let h = Harness::new(MockFetcher::new());
    let delivery = GateWatchingDelivery::new(Arc::clone(&h.gate));

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.processed, 1);
    assert_eq!(delivery.seen(), vec![(0, 0)]);
}

#[tokio::test]
async fn test_gate_slots_are_free_before_each_upload_in_a_sequential_batch() {
    let mut settings = dispatch_settings();
    settings.max_in_flight = 1;
    let h = Harness::with_settings(MockFetcher::new(), settings);
    let delivery = GateWatchingDelivery::new(Arc::clone(&h.gate));

    let result = h.dispatcher.run_batch(USER, items(12), &delivery, None).await;

    assert_eq!(result.processed, 12);
    let seen = delivery.seen();
    assert_eq!(seen.len(), 12);
    assert!(seen.iter().all(|occupancy| *occupancy == (0, 0)), "{:?}", seen);
}

#[tokio::test]
async fn test_grouped_send_happens_with_gate_empty() {
    let h = Harness::new(MockFetcher::new());
    let delivery = GateWatchingDelivery::new(Arc::clone(&h.gate));

    let result = h.dispatcher.run_batch(USER, items(3), &delivery, None).await;

    assert_eq!(result.processed, 3);
    assert_eq!(delivery.seen(), vec![(0, 0)]);
}

#[tokio::test]
async fn test_source_error_fails_without_fetch() {
    let h = Harness::new(MockFetcher::new());
    let mut broken = item("1001", 1);
    broken.source_error = Some("Resource not found".to_string());

    let delivery = RecordingDelivery::new();
    let result = h.dispatcher.run_batch(USER, vec![broken], &delivery, None).await;

    assert_eq!(result.processed, 0);
    assert_eq!(result.failed, 1);
    assert_eq!(
        result.failures[0].error,
        DownloadError::SourceError("Resource not found".to_string())
    );
    assert!(h.fetcher.calls().is_empty());
    assert!(delivery.sent().is_empty());
}

#[tokio::test]
async fn test_fallback_counts_item_once() {
    let fetcher = MockFetcher::new().script("1001", Codec::Alac, Err(FetchError::FormatNotAvailable(Codec::Alac)));
    let h = Harness::new(fetcher);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.processed, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(h.fetcher.calls_for("1001"), vec![Codec::Alac, Codec::Aac]);
    assert_eq!(delivery.sent().len(), 1);
}

#[tokio::test]
async fn test_exhausted_ladder_reports_attempts() {
    let fetcher = MockFetcher::new()
        .script("1001", Codec::Alac, Err(FetchError::FormatNotAvailable(Codec::Alac)))
        .script("1001", Codec::Aac, Err(FetchError::FormatNotAvailable(Codec::Aac)))
        .script("1001", Codec::AacLegacy, Err(FetchError::FormatNotAvailable(Codec::AacLegacy)));
    let h = Harness::new(fetcher);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.failed, 1);
    assert_eq!(
        result.failures[0].error,
        DownloadError::FormatsExhausted {
            attempted: vec![Codec::Alac, Codec::Aac, Codec::AacLegacy]
        }
    );
    assert!(result.failures[0].error.user_message().contains("alac, aac, aac-legacy"));
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[tokio::test]
async fn test_without_decrypt_helper_only_legacy_is_tried() {
    let mut settings = dispatch_settings();
    settings.helper_available = false;
    let h = Harness::with_settings(MockFetcher::new(), settings);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.processed, 1);
    assert_eq!(h.fetcher.calls_for("1001"), vec![Codec::AacLegacy]);
}

#[tokio::test]
async fn test_file_too_large_removes_artifact() {
    let mut settings = dispatch_settings();
    settings.max_file_size = 1000;
    let h = Harness::with_settings(MockFetcher::new().with_size(2048), settings);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.failed, 1);
    assert_eq!(
        result.failures[0].error,
        DownloadError::FileTooLarge {
            size: 2048,
            limit: 1000
        }
    );
    assert!(delivery.sent().is_empty());
    assert_eq!(files_left(&h.fetcher), 0);
    assert_eq!(h.cache.count().unwrap(), 0);
}

#[tokio::test]
async fn test_upload_failure_is_not_cached() {
    let h = Harness::new(MockFetcher::new());
    let delivery = RecordingDelivery::new().failing_artifact("1001");

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.failed, 1);
    assert!(matches!(result.failures[0].error, DownloadError::DeliveryFailed(_)));
    assert!(h.cache.peek("1001").unwrap().is_none());
    assert_eq!(files_left(&h.fetcher), 0);
}

#[tokio::test]
async fn test_user_at_capacity_is_rejected_before_fetch() {
    let h = Harness::new(MockFetcher::new());
    let _first = h.gate.acquire(USER).unwrap();
    let _second = h.gate.acquire(USER).unwrap();
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, vec![item("1001", 1)], &delivery, None).await;

    assert_eq!(result.failures[0].error, DownloadError::TooManyUserDownloads { limit: 2 });
    assert!(h.fetcher.calls().is_empty());
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_auth_expired_aborts_remaining_items() {
    let mut settings = dispatch_settings();
    settings.max_in_flight = 1;
    let fetcher = MockFetcher::new().script("1003", Codec::Alac, Err(FetchError::AuthExpired("401".to_string())));
    let h = Harness::with_settings(fetcher, settings);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, items(15), &delivery, None).await;

    assert_eq!(result.processed, 2);
    assert_eq!(result.failed, 13);
    assert_eq!(result.total(), 15);
    assert_eq!(result.aborted, Some(DownloadError::AuthExpired("401".to_string())));
    // The failing item is attempted once and never falls back
    assert_eq!(h.fetcher.calls_for("1003"), vec![Codec::Alac]);
    assert_eq!(h.fetcher.calls().len(), 3);
    assert!(result
        .failures
        .iter()
        .all(|failure| matches!(failure.error, DownloadError::AuthExpired(_))));
}

#[tokio::test]
async fn test_sibling_failures_do_not_stop_batch() {
    let fetcher = MockFetcher::new()
        .script("1004", Codec::Alac, Err(FetchError::Unknown("boom".to_string())))
        .script("1002", Codec::Alac, Err(FetchError::Unknown("boom".to_string())));
    let h = Harness::new(fetcher);
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, items(12), &delivery, None).await;

    assert_eq!(result.processed, 10);
    assert_eq!(result.failed, 2);
    assert!(result.aborted.is_none());
    let ordinals: Vec<usize> = result.failures.iter().map(|f| f.item.ordinal).collect();
    assert_eq!(ordinals, vec![2, 4]);
}

#[tokio::test]
async fn test_grouped_delivery_keeps_queue_order_and_caches_uploads() {
    let h = Harness::new(MockFetcher::new());
    let batch = items(3);
    h.cache.put(&batch[1].metadata(), &blob("cached-1002")).unwrap();
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, batch, &delivery, None).await;

    assert_eq!(result.processed, 3);
    assert_eq!(result.failed, 0);
    assert_eq!(result.grouped.len(), 3);

    let sent = delivery.sent();
    assert_eq!(sent.len(), 1);
    let Sent::Group(entries) = &sent[0] else {
        panic!("expected one grouped send, got {:?}", sent);
    };
    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["1001", "1002", "1003"]);
    assert!(entries[0].1.is_local());
    assert_eq!(entries[1].1, BlobRef::Remote("cached-1002".to_string()));
    assert!(entries[2].1.is_local());

    assert_eq!(h.cache.peek("1001").unwrap().unwrap().file_id, "file-1001");
    assert_eq!(h.cache.peek("1002").unwrap().unwrap().file_id, "cached-1002");
    assert_eq!(h.cache.peek("1003").unwrap().unwrap().file_id, "file-1003");
    assert_eq!(h.fetcher.calls().len(), 2);
    assert_eq!(files_left(&h.fetcher), 0);
}

#[tokio::test]
async fn test_group_failure_fails_every_grouped_item() {
    let h = Harness::new(MockFetcher::new());
    let delivery = RecordingDelivery::new().failing_group();

    let result = h.dispatcher.run_batch(USER, items(3), &delivery, None).await;

    assert_eq!(result.processed, 0);
    assert_eq!(result.failed, 3);
    assert!(result
        .failures
        .iter()
        .all(|failure| matches!(failure.error, DownloadError::DeliveryFailed(_))));
    assert_eq!(h.cache.count().unwrap(), 0);
    assert_eq!(files_left(&h.fetcher), 0);
}

#[tokio::test]
async fn test_large_batch_is_sent_item_by_item() {
    let h = Harness::new(MockFetcher::new());
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, items(11), &delivery, None).await;

    assert_eq!(result.processed, 11);
    assert!(result.grouped.is_empty());
    assert!(delivery.sent().iter().all(|sent| matches!(sent, Sent::Artifact { .. })));
    assert_eq!(h.cache.count().unwrap(), 11);
}

#[tokio::test]
async fn test_gate_is_released_after_batch() {
    let h = Harness::new(MockFetcher::new().with_delay(Duration::from_millis(20)));
    let delivery = RecordingDelivery::new();

    let result = h.dispatcher.run_batch(USER, items(12), &delivery, None).await;

    assert_eq!(result.processed, 12);
    assert!(h.fetcher.peak_concurrency() <= 2);
    assert_eq!(h.gate.active_global(), 0);
    assert_eq!(h.gate.active_for(USER), 0);
}

#[tokio::test]
async fn test_progress_is_reported_while_batch_runs() {
    let h = Harness::new(MockFetcher::new().with_delay(Duration::from_millis(40)));
    let delivery = RecordingDelivery::new();
    let status = Arc::new(RecordingStatus::default());

    let result = h
        .dispatcher
        .run_batch(
            USER,
            items(12),
            &delivery,
            Some(Arc::clone(&status) as Arc<dyn StatusMessage>),
        )
        .await;

    assert_eq!(result.processed, 12);
    let updates = status.updates();
    assert!(!updates.is_empty());
    assert!(updates.iter().all(|text| text.starts_with("Progress: ") && text.contains("/12")));
    assert!(!status.is_deleted());
}
