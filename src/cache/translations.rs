//! Translation cache keyed by article and language pair, gated by input fingerprint.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::TranslationRecord;
use crate::infra::storage::BlobStore;
use crate::util::Clock;

use super::config::CacheConfig;
use super::fingerprint::hash_paragraphs;
use super::keys::{self, KeyError, TRANSLATIONS_PREFIX};
use super::manager::{CacheError, CacheManager};

const FINGERPRINT_FIELD: &str = "paragraph_hash";

#[derive(Debug, Clone)]
pub struct TranslationCache {
    manager: CacheManager,
    ttl_hours: u32,
}

impl TranslationCache {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            manager: CacheManager::new("translation", store, clock),
            ttl_hours: config.translation_ttl_hours,
        }
    }

    pub fn key(
        &self,
        article_id: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, KeyError> {
        keys::translation_key(article_id, source_lang, target_lang)
    }

    pub fn prefix(&self) -> &'static str {
        TRANSLATIONS_PREFIX
    }

    pub fn ttl_hours(&self) -> u32 {
        self.ttl_hours
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    /// Fresh and translated from exactly `paragraphs`.
    pub async fn check_valid(
        &self,
        article_id: &str,
        source_lang: &str,
        target_lang: &str,
        paragraphs: &[String],
    ) -> bool {
        let Some(key) = self.checked_key(article_id, source_lang, target_lang) else {
            return false;
        };
        let fingerprint = hash_paragraphs(paragraphs);
        self.manager
            .check_valid_with(&key, self.ttl_hours, |document| {
                fingerprint_matches(document, &fingerprint)
            })
            .await
    }

    /// The stored record when [`check_valid`](Self::check_valid) would hold, read once.
    pub async fn lookup(
        &self,
        article_id: &str,
        source_lang: &str,
        target_lang: &str,
        paragraphs: &[String],
    ) -> Option<TranslationRecord> {
        let key = self.checked_key(article_id, source_lang, target_lang)?;
        let fingerprint = hash_paragraphs(paragraphs);
        self.manager
            .get_fresh(&key, self.ttl_hours, |document| {
                fingerprint_matches(document, &fingerprint)
            })
            .await
    }

    /// Stored record without expiry or fingerprint checks.
    pub async fn get(
        &self,
        article_id: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Option<TranslationRecord> {
        let key = self.checked_key(article_id, source_lang, target_lang)?;
        self.manager.get(&key).await
    }

    pub async fn save(
        &self,
        article_id: &str,
        source_lang: &str,
        target_lang: &str,
        paragraphs: &[String],
        translations: &[String],
    ) -> Result<String, CacheError> {
        let key = self.key(article_id, source_lang, target_lang)?;
        let record = TranslationRecord {
            article_id: article_id.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            paragraphs: paragraphs.to_vec(),
            translations: translations.to_vec(),
            paragraph_hash: hash_paragraphs(paragraphs),
            created_at: None,
            expires_at: None,
            cache_ttl_hours: None,
        };
        self.manager.save(&key, &record, self.ttl_hours).await
    }

    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        self.manager
            .cleanup_expired(TRANSLATIONS_PREFIX, self.ttl_hours)
            .await
    }

    fn checked_key(&self, article_id: &str, source_lang: &str, target_lang: &str) -> Option<String> {
        match self.key(article_id, source_lang, target_lang) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(article_id, source_lang, target_lang, error = %err, "Rejected translation cache key");
                None
            }
        }
    }
}

fn fingerprint_matches(document: &Map<String, Value>, expected: &str) -> bool {
    document
        .get(FINGERPRINT_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|stored| stored == expected)
}
