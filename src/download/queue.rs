//! Expands a locator into the ordered list of items for one batch.

use std::sync::Arc;
use std::time::Duration;

use super::catalog::{CatalogItem, CatalogLookup, CatalogRecord, Locator, LocatorKind};
use super::error::DownloadError;

/// Builds download queues from catalog lookups.
#[derive(Clone)]
pub struct QueueBuilder {
    lookup: Arc<dyn CatalogLookup>,
    /// Sleep before each playlist continuation request
    page_delay: Duration,
    /// Upper bound on items taken from one collection
    max_items: usize,
}

impl QueueBuilder {
    pub fn new(lookup: Arc<dyn CatalogLookup>, page_delay: Duration, max_items: usize) -> Self {
        Self {
            lookup,
            page_delay,
            max_items,
        }
    }

    /// Builds the item list for a locator.
    ///
    /// Song gives one item; album gives its song tracks in catalog order;
    /// playlist walks every continuation page sequentially. Entries the catalog
    /// failed to resolve are kept with `source_error` set so they show up in the
    /// failure count.
    ///
    /// # Errors
    ///
    /// `UpstreamUnavailable` if any lookup fails; no partial queue is returned.
    pub async fn build_queue(&self, locator: &Locator) -> Result<Vec<CatalogItem>, DownloadError> {
        let first = self.lookup.resolve(locator).await?;

        let records: Vec<CatalogRecord> = match locator.kind {
            LocatorKind::Song => first.records.into_iter().take(1).collect(),
            LocatorKind::Album => first.records,
            LocatorKind::Playlist => {
                let mut records = first.records;
                let mut next = first.next;
                while let Some(pointer) = next {
                    if records.len() >= self.max_items {
                        log::warn!(
                            "Playlist {} exceeds {} entries, ignoring remaining pages",
                            locator.catalog_id,
                            self.max_items
                        );
                        break;
                    }
                    if !self.page_delay.is_zero() {
                        tokio::time::sleep(self.page_delay).await;
                    }
                    let page = self.lookup.next_page(&pointer).await?;
                    log::debug!("Playlist {}: fetched {} more entries", locator.catalog_id, page.records.len());
                    records.extend(page.records);
                    next = page.next;
                }
                records
            }
        };

        let mut items: Vec<CatalogItem> = records
            .into_iter()
            .filter(|record| locator.kind == LocatorKind::Song || record.error.is_some() || record.is_song())
            .enumerate()
            .map(|(idx, record)| CatalogItem::from_record(record, locator, idx + 1))
            .collect();

        if items.len() > self.max_items {
            log::warn!(
                "Truncating {} {} from {} to {} items",
                locator.kind,
                locator.catalog_id,
                items.len(),
                self.max_items
            );
            items.truncate(self.max_items);
        }

        log::info!("Queue for {} {}: {} items", locator.kind, locator.catalog_id, items.len());
        Ok(items)
    }
}
