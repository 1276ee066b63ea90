//! Cached translations of an article's paragraphs.

use serde::{Deserialize, Serialize};

/// Stored under `cache/translations/<article_id>/<source_lang>_<target_lang>.json`.
///
/// `translations` is parallel to `paragraphs`; `paragraph_hash` fingerprints the
/// exact input so a changed article never serves an old translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub article_id: String,
    pub source_lang: String,
    pub target_lang: String,
    pub paragraphs: Vec<String>,
    pub translations: Vec<String>,
    pub paragraph_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_hours: Option<u32>,
}
