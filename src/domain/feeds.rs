//! Cached RSS feed snapshot.

use serde::{Deserialize, Serialize};

/// Channel-level metadata captured when the feed was fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedMetadata {
    pub title: String,
    pub description: String,
    pub link: String,
    pub language: String,
    pub last_build_date: String,
    /// RFC 3339 instant of the fetch; the expiry fallback for feed entries.
    pub fetch_timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub guid: String,
    pub pub_date: String,
    pub categories: Vec<String>,
    pub shortcode: String,
}

/// A parsed feed as stored under `cache/<source>/<feed-name>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    #[serde(default)]
    pub feed_metadata: FeedMetadata,
    #[serde(default)]
    pub items: Vec<FeedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_hours: Option<u32>,
}
