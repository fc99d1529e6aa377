//! Long-lived services shared by every handler.
//!
//! Built once in `main` from [`Settings`] and passed around by `Arc`; nothing
//! here is a global, including the authenticated catalog session.

use std::sync::Arc;

use crate::core::config::Settings;
use crate::download::apple::AppleMusicCatalog;
use crate::download::gamdl::GamdlFetcher;
use crate::download::{CatalogLookup, ConcurrencyGate, DispatchSettings, Dispatcher, Fetcher, QueueBuilder};
use crate::storage::{create_pool, CacheStore, DbPool};

pub struct AppServices {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub cache: CacheStore,
    pub gate: Arc<ConcurrencyGate>,
    pub queue_builder: QueueBuilder,
    pub dispatcher: Dispatcher,
}

impl AppServices {
    /// Opens storage and wires the production collaborators.
    pub fn build(settings: Settings) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&settings.temp_dir)?;

        let catalog: Arc<dyn CatalogLookup> = Arc::new(AppleMusicCatalog::new(
            settings.api_token.clone(),
            settings.media_user_token.clone(),
        )?);
        let fetcher: Arc<dyn Fetcher> = Arc::new(GamdlFetcher::from_settings(&settings));
        let db_pool = create_pool(&settings.database_path)?;

        Ok(Self::with_collaborators(settings, db_pool, catalog, fetcher))
    }

    /// Wires services around the given catalog and fetcher.
    pub fn with_collaborators(
        settings: Settings,
        db_pool: DbPool,
        catalog: Arc<dyn CatalogLookup>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let cache = CacheStore::new(db_pool.clone());
        let gate = Arc::new(ConcurrencyGate::new(settings.max_per_user, settings.max_global));
        let queue_builder = QueueBuilder::new(catalog, settings.page_delay, settings.max_queue_items);
        let dispatcher = Dispatcher::new(
            cache.clone(),
            Arc::clone(&gate),
            fetcher,
            DispatchSettings::from_settings(&settings),
        );

        Self {
            settings,
            db_pool,
            cache,
            gate,
            queue_builder,
            dispatcher,
        }
    }
}
