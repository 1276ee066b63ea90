//! Wiring of caches, quotas and services from resolved settings.

use std::sync::Arc;

use crate::application::articles::{ArticleService, ArticleSource};
use crate::application::error::AppError;
use crate::application::feed::{FeedService, FeedSource};
use crate::application::maintenance::CacheMaintenance;
use crate::application::rate_limit::{
    ARTICLE_SCRAPER, FunctionQuotas, QuotaGate, QuotaLimiter, RSS_FEED_PARSER, TRANSLATE_ARTICLE,
};
use crate::application::translation::{RetryingTranslator, TranslationService, Translator};
use crate::cache::{ArticleCache, CacheConfig, FeedCache, KeyError, TranslationCache};
use crate::config::{Settings, TranslationSettings};
use crate::infra::error::InfraError;
use crate::infra::storage::BlobStore;
use crate::infra::tables::TableStore;
use crate::util::Clock;

/// Everything the services share, built once at startup.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    cache_config: CacheConfig,
    feeds: FeedCache,
    articles: ArticleCache,
    translations: TranslationCache,
    quotas: Arc<QuotaLimiter>,
    function_quotas: FunctionQuotas,
    client_limiter: Arc<QuotaLimiter>,
    client_max_requests: u32,
    translation: TranslationSettings,
}

impl ServiceContext {
    pub fn new(
        settings: &Settings,
        blobs: Arc<dyn BlobStore>,
        tables: Arc<dyn TableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let cache_config = CacheConfig::from(&settings.cache);
        let invalid_key = |err: KeyError| {
            AppError::from(InfraError::configuration(format!("cache key: {err}")))
        };

        let feeds = FeedCache::new(blobs.clone(), clock.clone(), &cache_config)
            .map_err(invalid_key)?;
        let articles = ArticleCache::new(blobs.clone(), clock.clone(), &cache_config)
            .map_err(invalid_key)?;
        let translations = TranslationCache::new(blobs, clock.clone(), &cache_config);

        let rate_limit = &settings.rate_limit;
        let quotas = Arc::new(QuotaLimiter::daily(
            tables.clone(),
            clock.clone(),
            rate_limit.table.clone(),
        ));
        let client_limiter = Arc::new(QuotaLimiter::per_ip(
            tables,
            clock,
            rate_limit.table.clone(),
            rate_limit.ip_window_minutes.get(),
        ));

        Ok(Self {
            cache_config,
            feeds,
            articles,
            translations,
            quotas,
            function_quotas: FunctionQuotas::from_settings(rate_limit),
            client_limiter,
            client_max_requests: rate_limit.ip_max_requests.get(),
            translation: settings.translation.clone(),
        })
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }

    pub fn quotas(&self) -> &Arc<QuotaLimiter> {
        &self.quotas
    }

    pub fn function_quotas(&self) -> &FunctionQuotas {
        &self.function_quotas
    }

    pub fn client_limiter(&self) -> &Arc<QuotaLimiter> {
        &self.client_limiter
    }

    pub fn client_max_requests(&self) -> u32 {
        self.client_max_requests
    }

    pub fn maintenance(&self) -> CacheMaintenance {
        CacheMaintenance::new(
            self.feeds.clone(),
            self.articles.clone(),
            self.translations.clone(),
        )
    }

    pub fn translation_service(&self, translator: Arc<dyn Translator>) -> TranslationService {
        TranslationService::new(
            self.translations.clone(),
            RetryingTranslator::from_settings(translator, &self.translation),
            self.gate(TRANSLATE_ARTICLE),
            self.cache_config.sweep_on_request,
        )
    }

    pub fn article_service(&self, source: Arc<dyn ArticleSource>) -> ArticleService {
        ArticleService::new(
            self.articles.clone(),
            source,
            self.gate(ARTICLE_SCRAPER),
            self.cache_config.sweep_on_request,
        )
    }

    pub fn feed_service(&self, source: Arc<dyn FeedSource>) -> FeedService {
        FeedService::new(
            self.feeds.clone(),
            source,
            self.gate(RSS_FEED_PARSER),
            self.cache_config.sweep_on_request,
        )
    }

    fn gate(&self, function_name: &'static str) -> QuotaGate {
        let limit = self
            .function_quotas
            .limit_for(function_name)
            .unwrap_or_default();
        QuotaGate::new(self.quotas.clone(), function_name, limit)
    }
}
