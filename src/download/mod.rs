//! Download dispatch: link classification, queue building, admission,
//! codec fallback and batch execution

pub mod apple;
pub mod catalog;
pub mod codec;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod gamdl;
pub mod gate;
pub mod link;
pub mod queue;

// Re-exports for convenience
pub use catalog::{CatalogItem, CatalogLookup, CatalogPage, CatalogRecord, Locator, LocatorKind, TrackMetadata};
pub use codec::Codec;
pub use delivery::{BlobRef, Delivery, StatusMessage, UploadedBlob};
pub use dispatcher::{BatchResult, DispatchSettings, Dispatcher, ItemFailure};
pub use error::DownloadError;
pub use fetch::{FetchError, Fetcher};
pub use gate::{ConcurrencyGate, GatePermit};
pub use queue::QueueBuilder;
