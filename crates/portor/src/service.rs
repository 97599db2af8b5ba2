//! Lookup and search workflows with result caching.

use std::sync::Arc;

use crate::cache::ResultCache;
use crate::client::RegistryClient;
use crate::config::RegistryConfig;
use crate::criteria::{search_cache_key, LookupParams, SearchCriteria};
use crate::extract::DocumentExtractor;
use crate::ocr::{OcrEngine, TesseractEngine};
use crate::session::SessionAcquirer;
use crate::solver::CaptchaSolver;
use crate::types::{RegistryError, RegistryResult, SearchPage, TenantDetail};

/// Entry point for the API layer.
///
/// Cheap to clone; clones share both caches.
#[derive(Clone)]
pub struct Portor {
    client: RegistryClient,
    extractor: DocumentExtractor,
    detail_cache: ResultCache<TenantDetail>,
    search_cache: ResultCache<SearchPage>,
}

impl Portor {
    /// Service backed by the `tesseract` binary named in the config.
    pub fn new(config: RegistryConfig) -> RegistryResult<Self> {
        let engine = Arc::new(TesseractEngine::new(config.ocr.clone()));
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: RegistryConfig, engine: Arc<dyn OcrEngine>) -> RegistryResult<Self> {
        let config = Arc::new(config);
        let solver = CaptchaSolver::new(engine);
        let acquirer = SessionAcquirer::new(Arc::clone(&config), solver)?;
        let client = RegistryClient::new(config.endpoints(), acquirer);
        let extractor = DocumentExtractor::new(&config.origin);

        let (detail_cache, search_cache) = if config.cache_enabled {
            (
                ResultCache::new(config.detail_cache),
                ResultCache::new(config.search_cache),
            )
        } else {
            tracing::warn!("Result caches disabled");
            (ResultCache::disabled(), ResultCache::disabled())
        };

        Ok(Self {
            client,
            extractor,
            detail_cache,
            search_cache,
        })
    }

    /// Full record of the first sole proprietorship matching `params`.
    pub async fn lookup(&self, params: &LookupParams) -> RegistryResult<TenantDetail> {
        let criteria = params.criteria()?;
        let key = params.cache_key();

        self.detail_cache
            .get_or_try_insert_with(key.clone(), async {
                tracing::info!("Detail cache miss for {key}");
                self.fetch_tenant(&criteria).await
            })
            .await
    }

    /// One page of search results for a free-text query.
    pub async fn search(&self, query: &str, page: u32) -> RegistryResult<SearchPage> {
        let criteria = SearchCriteria::from_query(query)?;
        if page == 0 {
            return Err(RegistryError::validation("page", "Must be 1 or greater"));
        }
        let key = search_cache_key(query, page);

        self.search_cache
            .get_or_try_insert_with(key.clone(), async {
                tracing::info!("Search cache miss for {key}");
                let listing = self.client.search(&criteria, page).await?;
                Ok(listing.into_page())
            })
            .await
    }

    async fn fetch_tenant(&self, criteria: &SearchCriteria) -> RegistryResult<TenantDetail> {
        let listing = self.client.search(criteria, 1).await?;
        let Some(first) = listing.records.first() else {
            return Err(RegistryError::RecordNotFound(
                "no sole proprietorship matches".to_string(),
            ));
        };

        let html = self
            .client
            .fetch_detail(&listing.session, &first.registry_id)
            .await?;
        self.extractor.extract(&html)
    }
}
