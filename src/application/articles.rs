//! Article retrieval through the article cache.
//!
//! Each URL is served from cache when a fresh entry exists; otherwise the
//! configured [`ArticleSource`] is asked for it and the result stored. A batch
//! consumes one unit of the daily quota if anything had to be fetched.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::application::error::AppError;
use crate::application::rate_limit::QuotaGate;
use crate::cache::{ArticleCache, SingleFlight};
use crate::domain::ArticleRecord;

pub const DEFAULT_LANGUAGE: &str = "fi";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("article source unavailable: {0}")]
    Unavailable(String),
    #[error("article not found: {0}")]
    NotFound(String),
    #[error("article could not be parsed: {0}")]
    Malformed(String),
}

/// Produces article text for a URL.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        shortcode: &str,
        language: &str,
    ) -> Result<ArticleRecord, SourceError>;
}

/// The article identifier: the last path segment after `/a/`, without query
/// or fragment. Empty when the URL has no `/a/` segment.
pub fn extract_shortcode(url: &str) -> &str {
    let Some((_, tail)) = url.rsplit_once("/a/") else {
        return "";
    };
    let tail = tail.split('?').next().unwrap_or(tail);
    tail.split('#').next().unwrap_or(tail)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArticleResult {
    Ok(ArticleSummary),
    Failed(ArticleFailure),
}

impl ArticleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ArticleResult::Ok(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleSummary {
    pub success: bool,
    pub cached: bool,
    pub url: String,
    pub shortcode: String,
    pub title: String,
    pub paragraphs: Vec<String>,
    pub paragraphs_count: usize,
    pub blob_path: String,
    pub scraped_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scraper_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleFailure {
    pub success: bool,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleBatch {
    pub success: bool,
    pub results: Vec<ArticleResult>,
    pub total: usize,
    pub succeeded: usize,
}

impl ArticleBatch {
    fn from_results(results: Vec<ArticleResult>) -> Self {
        let succeeded = results.iter().filter(|result| result.is_success()).count();
        Self {
            success: succeeded > 0,
            total: results.len(),
            succeeded,
            results,
        }
    }
}

fn summary(article: ArticleRecord, blob_path: String, cached: bool) -> ArticleResult {
    ArticleResult::Ok(ArticleSummary {
        success: true,
        cached,
        paragraphs_count: article.paragraphs.len(),
        url: article.url,
        shortcode: article.shortcode,
        title: article.title,
        paragraphs: article.paragraphs,
        blob_path,
        scraped_at: article.scraped_at,
        scraper_version: article.scraper_version,
    })
}

fn failure(url: &str, error: impl Into<String>) -> ArticleResult {
    ArticleResult::Failed(ArticleFailure {
        success: false,
        url: url.to_string(),
        error: error.into(),
    })
}

enum Pending {
    Done(ArticleResult),
    Fetch {
        url: String,
        shortcode: String,
        key: String,
    },
}

pub struct ArticleService {
    cache: ArticleCache,
    source: Arc<dyn ArticleSource>,
    quota: QuotaGate,
    flights: SingleFlight<Result<ArticleRecord, SourceError>>,
    sweep_on_request: bool,
}

impl ArticleService {
    pub fn new(
        cache: ArticleCache,
        source: Arc<dyn ArticleSource>,
        quota: QuotaGate,
        sweep_on_request: bool,
    ) -> Self {
        Self {
            cache,
            source,
            quota,
            flights: SingleFlight::new(),
            sweep_on_request,
        }
    }

    pub fn cache(&self) -> &ArticleCache {
        &self.cache
    }

    pub async fn fetch(&self, urls: &[String], language: &str) -> Result<ArticleBatch, AppError> {
        if urls.is_empty() {
            return Err(AppError::validation("at least one url is required"));
        }
        info!(urls = urls.len(), language, "Article fetch requested");

        if self.sweep_on_request
            && let Err(err) = self.cache.cleanup_expired().await
        {
            warn!(error = %err, "Article cache sweep failed");
        }

        let mut pending = Vec::with_capacity(urls.len());
        for url in urls {
            pending.push(self.resolve_cached(url, language).await);
        }

        if pending.iter().any(|item| matches!(item, Pending::Fetch { .. })) {
            self.quota.check().await?;
        }

        let mut fetched_any = false;
        let mut results = Vec::with_capacity(pending.len());
        for item in pending {
            let result = match item {
                Pending::Done(result) => result,
                Pending::Fetch {
                    url,
                    shortcode,
                    key,
                } => {
                    let flight = self
                        .flights
                        .run(&key, || self.fetch_and_store(&url, &shortcode, language))
                        .await;
                    fetched_any |= flight.leader;
                    match flight.value {
                        Ok(article) => summary(article, key, false),
                        Err(err) => {
                            warn!(%url, error = %err, "Article fetch failed");
                            failure(&url, err.to_string())
                        }
                    }
                }
            };
            results.push(result);
        }

        if fetched_any {
            self.quota.record().await;
        }

        let batch = ArticleBatch::from_results(results);
        info!(
            total = batch.total,
            succeeded = batch.succeeded,
            "Article fetch finished"
        );
        Ok(batch)
    }

    async fn resolve_cached(&self, url: &str, language: &str) -> Pending {
        if let Err(err) = Url::parse(url) {
            return Pending::Done(failure(url, format!("invalid url: {err}")));
        }
        let shortcode = extract_shortcode(url);
        if shortcode.is_empty() {
            return Pending::Done(failure(url, "could not extract shortcode from url"));
        }
        let key = match self.cache.key(shortcode, language) {
            Ok(key) => key,
            Err(err) => return Pending::Done(failure(url, err.to_string())),
        };

        match self.cache.get_fresh(shortcode, language).await {
            Some(article) => {
                info!(shortcode, "Returning cached article");
                Pending::Done(summary(article, key, true))
            }
            None => Pending::Fetch {
                url: url.to_string(),
                shortcode: shortcode.to_string(),
                key,
            },
        }
    }

    async fn fetch_and_store(
        &self,
        url: &str,
        shortcode: &str,
        language: &str,
    ) -> Result<ArticleRecord, SourceError> {
        let mut article = self.source.fetch(url, shortcode, language).await?;
        // Stored under the URL's shortcode so lookups find it again.
        article.shortcode = shortcode.to_string();
        if article.url.is_empty() {
            article.url = url.to_string();
        }
        if let Err(err) = self.cache.save(language, &article).await {
            warn!(shortcode, error = %err, "Failed to cache article");
        }
        Ok(article)
    }
}
