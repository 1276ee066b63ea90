//! Cached article text.

use serde::{Deserialize, Serialize};

/// A scraped article as stored under `cache/<source>/articles/<shortcode>_<lang>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub url: String,
    pub shortcode: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub paragraphs: Vec<String>,
    /// RFC 3339 instant of the scrape; the expiry fallback for article entries.
    pub scraped_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraper_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_hours: Option<u32>,
}
