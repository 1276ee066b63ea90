//! Cache configuration.
//!
//! Identifies the news source and fixes the ttl each cache stamps on write.

use serde::Deserialize;

const DEFAULT_SOURCE: &str = "yle";
const DEFAULT_FEED_NAME: &str = "paauutiset";
const DEFAULT_FEED_TTL_HOURS: u32 = 1;
const DEFAULT_ARTICLE_TTL_HOURS: u32 = 1;
const DEFAULT_TRANSLATION_TTL_HOURS: u32 = 24;

/// Cache configuration derived from `[cache]` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Source segment of feed and article keys.
    pub source: String,
    /// File stem of the feed blob.
    pub feed_name: String,
    pub feed_ttl_hours: u32,
    pub article_ttl_hours: u32,
    pub translation_ttl_hours: u32,
    /// Sweep expired entries before serving a request.
    pub sweep_on_request: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            feed_name: DEFAULT_FEED_NAME.to_string(),
            feed_ttl_hours: DEFAULT_FEED_TTL_HOURS,
            article_ttl_hours: DEFAULT_ARTICLE_TTL_HOURS,
            translation_ttl_hours: DEFAULT_TRANSLATION_TTL_HOURS,
            sweep_on_request: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            source: settings.source.clone(),
            feed_name: settings.feed_name.clone(),
            feed_ttl_hours: settings.feed_ttl_hours.get(),
            article_ttl_hours: settings.article_ttl_hours.get(),
            translation_ttl_hours: settings.translation_ttl_hours.get(),
            sweep_on_request: settings.sweep_on_request,
        }
    }
}
