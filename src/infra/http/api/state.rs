use std::sync::Arc;

use crate::application::articles::ArticleService;
use crate::application::context::ServiceContext;
use crate::application::feed::FeedService;
use crate::application::maintenance::CacheMaintenance;
use crate::application::rate_limit::{FunctionQuotas, QuotaLimiter};
use crate::application::translation::TranslationService;

/// Per-client request budget applied to every `/api/v1` route.
#[derive(Debug, Clone)]
pub struct ClientLimit {
    pub limiter: Arc<QuotaLimiter>,
    pub max_requests: u32,
}

#[derive(Clone)]
pub struct ApiState {
    pub maintenance: Arc<CacheMaintenance>,
    pub quotas: Arc<QuotaLimiter>,
    pub function_quotas: FunctionQuotas,
    pub client_limit: ClientLimit,
    /// Content operations exist only when their upstream source is wired in.
    pub translations: Option<Arc<TranslationService>>,
    pub articles: Option<Arc<ArticleService>>,
    pub feed: Option<Arc<FeedService>>,
}

impl ApiState {
    /// Operations-only state; content routes answer 503 until a source is attached.
    pub fn new(context: &ServiceContext) -> Self {
        Self {
            maintenance: Arc::new(context.maintenance()),
            quotas: context.quotas().clone(),
            function_quotas: context.function_quotas().clone(),
            client_limit: ClientLimit {
                limiter: context.client_limiter().clone(),
                max_requests: context.client_max_requests(),
            },
            translations: None,
            articles: None,
            feed: None,
        }
    }

    pub fn with_translations(mut self, service: TranslationService) -> Self {
        self.translations = Some(Arc::new(service));
        self
    }

    pub fn with_articles(mut self, service: ArticleService) -> Self {
        self.articles = Some(Arc::new(service));
        self
    }

    pub fn with_feed(mut self, service: FeedService) -> Self {
        self.feed = Some(Arc::new(service));
        self
    }
}
