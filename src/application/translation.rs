//! Cached paragraph translation with bounded retries and best-effort passthrough.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::error::AppError;
use crate::application::rate_limit::QuotaGate;
use crate::application::retry::RetryPolicy;
use crate::cache::{SingleFlight, TranslationCache, expiry::format_timestamp, hash_paragraphs};
use crate::config::TranslationSettings;

const DEFAULT_SOURCE_LANG: &str = "fi";
const DEFAULT_TARGET_LANG: &str = "en";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// Timeouts, connection failures and 5xx responses.
    #[error("transient translation failure: {0}")]
    Transient(String),
    #[error("translation provider is throttling requests")]
    RateLimited,
    /// Authentication failures and other non-retryable rejections.
    #[error("translation rejected: {0}")]
    Rejected(String),
}

/// A provider that translates one text at a time.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslateError>;
}

/// Wraps a [`Translator`] so that every call yields text.
///
/// Transient failures wait on the `transient` schedule and provider throttling
/// on the `throttled` one; the attempt bound comes from `transient`. On
/// rejection or exhaustion the original text is returned.
pub struct RetryingTranslator {
    inner: Arc<dyn Translator>,
    transient: RetryPolicy,
    throttled: RetryPolicy,
}

impl RetryingTranslator {
    pub fn new(inner: Arc<dyn Translator>, transient: RetryPolicy, throttled: RetryPolicy) -> Self {
        Self {
            inner,
            transient,
            throttled,
        }
    }

    /// Fixed pause after transient failures, `2 * delay * (n + 1)` after throttling.
    pub fn from_settings(inner: Arc<dyn Translator>, settings: &TranslationSettings) -> Self {
        Self::new(
            inner,
            RetryPolicy::fixed(settings.max_retries, settings.retry_delay),
            RetryPolicy::linear(settings.max_retries, settings.retry_delay.saturating_mul(2)),
        )
    }

    fn pause_after(&self, error: &TranslateError, attempt: u32) -> Duration {
        match error {
            TranslateError::RateLimited => self.throttled.delay(attempt),
            _ => self.transient.delay(attempt),
        }
    }

    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let mut attempt = 0;
        loop {
            let wait = match self.inner.translate(text, source_lang, target_lang).await {
                Ok(translated) => return translated,
                Err(TranslateError::Rejected(reason)) => {
                    warn!(%reason, "Translation rejected; returning original text");
                    return text.to_string();
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        attempt = attempt + 1,
                        max_attempts = self.transient.max_attempts(),
                        "Translation attempt failed"
                    );
                    self.pause_after(&err, attempt)
                }
            };

            attempt += 1;
            if !self.transient.should_retry(attempt) {
                break;
            }
            debug!(wait_ms = wait.as_millis() as u64, attempt, "Retrying translation");
            tokio::time::sleep(wait).await;
        }

        warn!(
            attempts = attempt,
            "Translation failed after all retries; returning original text"
        );
        text.to_string()
    }

    /// Translate each text in order, one call at a time.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Vec<String> {
        let mut translated = Vec::with_capacity(texts.len());
        for text in texts {
            translated.push(self.translate(text, source_lang, target_lang).await);
        }
        translated
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationRequest {
    pub article_id: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default)]
    pub paragraphs: Vec<String>,
}

fn default_source_lang() -> String {
    DEFAULT_SOURCE_LANG.to_string()
}

fn default_target_lang() -> String {
    DEFAULT_TARGET_LANG.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationOutcome {
    pub article_id: String,
    pub source_lang: String,
    pub target_lang: String,
    pub translations: Vec<String>,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<String>,
    pub translated_at: String,
}

#[derive(Debug)]
struct Translated {
    translations: Vec<String>,
    translated_at: String,
}

pub struct TranslationService {
    cache: TranslationCache,
    translator: RetryingTranslator,
    quota: QuotaGate,
    flights: SingleFlight<Arc<Translated>>,
    sweep_on_request: bool,
}

impl TranslationService {
    pub fn new(
        cache: TranslationCache,
        translator: RetryingTranslator,
        quota: QuotaGate,
        sweep_on_request: bool,
    ) -> Self {
        Self {
            cache,
            translator,
            quota,
            flights: SingleFlight::new(),
            sweep_on_request,
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Serve from cache when the stored translation is fresh and was made from
    /// exactly these paragraphs; otherwise translate, store and count quota.
    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationOutcome, AppError> {
        if request.article_id.trim().is_empty() || request.paragraphs.is_empty() {
            return Err(AppError::validation("article_id and paragraphs required"));
        }
        let key = self
            .cache
            .key(&request.article_id, &request.source_lang, &request.target_lang)
            .map_err(|err| AppError::validation(err.to_string()))?;

        info!(
            article_id = %request.article_id,
            source_lang = %request.source_lang,
            target_lang = %request.target_lang,
            paragraphs = request.paragraphs.len(),
            "Translation requested"
        );

        if self.sweep_on_request
            && let Err(err) = self.cache.cleanup_expired().await
        {
            warn!(error = %err, "Translation cache sweep failed");
        }

        if let Some(record) = self
            .cache
            .lookup(
                &request.article_id,
                &request.source_lang,
                &request.target_lang,
                &request.paragraphs,
            )
            .await
        {
            info!(article_id = %request.article_id, "Returning cached translation");
            let translated_at = record
                .created_at
                .clone()
                .unwrap_or_else(|| format_timestamp(self.cache.manager().now()));
            return Ok(TranslationOutcome {
                article_id: request.article_id.clone(),
                source_lang: request.source_lang.clone(),
                target_lang: request.target_lang.clone(),
                translations: record.translations,
                cache_hit: true,
                cached_at: record.created_at,
                translated_at,
            });
        }

        self.quota.check().await?;

        let flight_key = format!("{key}#{}", hash_paragraphs(&request.paragraphs));
        let flight = self
            .flights
            .run(&flight_key, || self.translate_and_store(request))
            .await;

        Ok(TranslationOutcome {
            article_id: request.article_id.clone(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            translations: flight.value.translations.clone(),
            cache_hit: false,
            cached_at: None,
            translated_at: flight.value.translated_at.clone(),
        })
    }

    async fn translate_and_store(&self, request: &TranslationRequest) -> Arc<Translated> {
        let translations = self
            .translator
            .translate_batch(
                &request.paragraphs,
                &request.source_lang,
                &request.target_lang,
            )
            .await;

        // A failed save only costs a future cache hit.
        if let Err(err) = self
            .cache
            .save(
                &request.article_id,
                &request.source_lang,
                &request.target_lang,
                &request.paragraphs,
                &translations,
            )
            .await
        {
            warn!(article_id = %request.article_id, error = %err, "Failed to cache translation");
        }
        self.quota.record().await;

        Arc::new(Translated {
            translations,
            translated_at: format_timestamp(self.cache.manager().now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, TranslateError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, TranslateError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Translator for Scripted {
        async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, TranslateError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TranslateError::Transient("script exhausted".into())))
        }
    }

    fn retrying(inner: Arc<Scripted>) -> RetryingTranslator {
        RetryingTranslator::new(
            inner,
            RetryPolicy::fixed(3, Duration::from_millis(1)),
            RetryPolicy::linear(3, Duration::from_millis(2)),
        )
    }

    #[test]
    fn throttling_backs_off_while_transient_failures_wait_a_fixed_delay() {
        let settings = TranslationSettings {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        };
        let translator = RetryingTranslator::from_settings(Scripted::new(Vec::new()), &settings);
        let transient = TranslateError::Transient("502".into());

        assert_eq!(translator.pause_after(&transient, 0), Duration::from_secs(2));
        assert_eq!(translator.pause_after(&transient, 2), Duration::from_secs(2));
        assert_eq!(
            translator.pause_after(&TranslateError::RateLimited, 0),
            Duration::from_secs(4)
        );
        assert_eq!(
            translator.pause_after(&TranslateError::RateLimited, 1),
            Duration::from_secs(8)
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let inner = Scripted::new(vec![
            Err(TranslateError::Transient("503".into())),
            Err(TranslateError::RateLimited),
            Ok("Hello".into()),
        ]);
        let translator = retrying(inner.clone());

        assert_eq!(translator.translate("Hei", "fi", "en").await, "Hello");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_original_text() {
        let inner = Scripted::new(Vec::new());
        let translator = retrying(inner.clone());

        assert_eq!(translator.translate("Hei", "fi", "en").await, "Hei");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let inner = Scripted::new(vec![Err(TranslateError::Rejected("401".into()))]);
        let translator = retrying(inner.clone());

        assert_eq!(translator.translate("Hei", "fi", "en").await, "Hei");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn blank_text_skips_the_provider() {
        let inner = Scripted::new(Vec::new());
        let translator = retrying(inner.clone());

        assert_eq!(translator.translate("  ", "fi", "en").await, "  ");
        assert_eq!(translator.translate("", "fi", "en").await, "");
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let inner = Scripted::new(vec![Ok("one".into()), Ok("two".into())]);
        let translator = retrying(inner);

        let out = translator
            .translate_batch(&["yksi".to_string(), "kaksi".to_string()], "fi", "en")
            .await;
        assert_eq!(out, vec!["one", "two"]);
    }

    #[test]
    fn request_languages_default_to_finnish_and_english() {
        let request: TranslationRequest =
            serde_json::from_str(r#"{ "article_id": "a", "paragraphs": ["x"] }"#).unwrap();
        assert_eq!(request.source_lang, "fi");
        assert_eq!(request.target_lang, "en");
    }
}
