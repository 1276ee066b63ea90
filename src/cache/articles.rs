//! Article text cache, one blob per shortcode and language.

use std::sync::Arc;

use tracing::warn;

use crate::domain::ArticleRecord;
use crate::infra::storage::BlobStore;
use crate::util::Clock;

use super::config::CacheConfig;
use super::keys::{self, KeyError};
use super::manager::{CacheError, CacheManager};

#[derive(Debug, Clone)]
pub struct ArticleCache {
    manager: CacheManager,
    source: String,
    prefix: String,
    ttl_hours: u32,
}

impl ArticleCache {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Result<Self, KeyError> {
        Ok(Self {
            manager: CacheManager::new("article", store, clock),
            prefix: keys::articles_prefix(&config.source)?,
            source: config.source.clone(),
            ttl_hours: config.article_ttl_hours,
        })
    }

    pub fn key(&self, shortcode: &str, lang: &str) -> Result<String, KeyError> {
        keys::article_key(&self.source, shortcode, lang)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl_hours(&self) -> u32 {
        self.ttl_hours
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    /// Invalid identifiers can never have been stored and read as a miss.
    pub async fn check_valid(&self, shortcode: &str, lang: &str) -> bool {
        match self.checked_key(shortcode, lang) {
            Some(key) => self.manager.check_valid(&key, self.ttl_hours).await,
            None => false,
        }
    }

    pub async fn get(&self, shortcode: &str, lang: &str) -> Option<ArticleRecord> {
        let key = self.checked_key(shortcode, lang)?;
        self.manager.get(&key).await
    }

    pub async fn get_fresh(&self, shortcode: &str, lang: &str) -> Option<ArticleRecord> {
        let key = self.checked_key(shortcode, lang)?;
        self.manager
            .get_fresh(&key, self.ttl_hours, |_| true)
            .await
    }

    pub async fn save(&self, lang: &str, article: &ArticleRecord) -> Result<String, CacheError> {
        let key = self.key(&article.shortcode, lang)?;
        self.manager.save(&key, article, self.ttl_hours).await
    }

    /// Keys of every cached article, sorted.
    pub async fn list(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.manager.store().list(&self.prefix).await?)
    }

    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        self.manager
            .cleanup_expired(&self.prefix, self.ttl_hours)
            .await
    }

    fn checked_key(&self, shortcode: &str, lang: &str) -> Option<String> {
        match self.key(shortcode, lang) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(shortcode, lang, error = %err, "Rejected article cache key");
                None
            }
        }
    }
}
