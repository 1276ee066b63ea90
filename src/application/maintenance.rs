//! Operator-facing cache sweeps and status reporting.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::error::AppError;
use crate::cache::expiry::format_timestamp;
use crate::cache::{ArticleCache, CacheError, FeedCache, TranslationCache};

const STATUS_SAMPLE: usize = 10;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SweepScope {
    #[default]
    All,
    Feeds,
    Articles,
    Translations,
}

impl SweepScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SweepScope::All => "all",
            SweepScope::Feeds => "feeds",
            SweepScope::Articles => "articles",
            SweepScope::Translations => "translations",
        }
    }

    fn includes(self, other: SweepScope) -> bool {
        self == SweepScope::All || self == other
    }
}

/// Entries removed per cache; `None` where the scope skipped that cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scope: SweepScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feeds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translations: Option<usize>,
    pub total: usize,
    pub swept_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub path: String,
    pub exists: bool,
    pub valid: bool,
    pub items_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticlesStatus {
    pub prefix: String,
    pub count: usize,
    /// First keys in sorted order.
    pub sample: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationsStatus {
    pub prefix: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub backend: &'static str,
    pub feed: FeedStatus,
    pub articles: ArticlesStatus,
    pub translations: TranslationsStatus,
    pub checked_at: String,
}

#[derive(Debug, Clone)]
pub struct CacheMaintenance {
    feeds: FeedCache,
    articles: ArticleCache,
    translations: TranslationCache,
}

impl CacheMaintenance {
    pub fn new(feeds: FeedCache, articles: ArticleCache, translations: TranslationCache) -> Self {
        Self {
            feeds,
            articles,
            translations,
        }
    }

    pub async fn sweep(&self, scope: SweepScope) -> Result<SweepReport, AppError> {
        let mut report = SweepReport {
            scope,
            ..SweepReport::default()
        };

        // Articles first: the feed prefix spans the article entries too.
        if scope.includes(SweepScope::Articles) {
            report.articles = Some(self.articles.cleanup_expired().await?);
        }
        if scope.includes(SweepScope::Feeds) {
            report.feeds = Some(self.feeds.cleanup_expired().await?);
        }
        if scope.includes(SweepScope::Translations) {
            report.translations = Some(self.translations.cleanup_expired().await?);
        }

        report.total = [report.feeds, report.articles, report.translations]
            .into_iter()
            .flatten()
            .sum();
        report.swept_at = format_timestamp(self.feeds.manager().now());

        info!(
            scope = scope.as_str(),
            total = report.total,
            "Cache sweep finished"
        );
        Ok(report)
    }

    pub async fn status(&self) -> Result<CacheStatus, AppError> {
        let store = self.feeds.manager().store();

        let exists = store
            .exists(self.feeds.key())
            .await
            .map_err(CacheError::from)?;
        let snapshot = if exists { self.feeds.get().await } else { None };
        let feed = FeedStatus {
            path: self.feeds.key().to_string(),
            exists,
            valid: exists && self.feeds.check_valid().await,
            items_count: snapshot.as_ref().map_or(0, |s| s.items.len()),
            title: snapshot
                .as_ref()
                .map(|s| s.feed_metadata.title.clone())
                .filter(|title| !title.is_empty()),
            last_fetch: snapshot
                .as_ref()
                .map(|s| s.feed_metadata.fetch_timestamp.clone())
                .filter(|at| !at.is_empty()),
        };

        let article_keys = self.articles.list().await?;
        let articles = ArticlesStatus {
            prefix: self.articles.prefix().to_string(),
            count: article_keys.len(),
            sample: article_keys.into_iter().take(STATUS_SAMPLE).collect(),
        };

        let translation_keys = self
            .translations
            .manager()
            .store()
            .list(self.translations.prefix())
            .await
            .map_err(CacheError::from)?;
        let translations = TranslationsStatus {
            prefix: self.translations.prefix().to_string(),
            count: translation_keys.len(),
        };

        Ok(CacheStatus {
            backend: store.backend(),
            feed,
            articles,
            translations,
            checked_at: format_timestamp(self.feeds.manager().now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use time::macros::datetime;

    use crate::cache::CacheConfig;
    use crate::domain::{ArticleRecord, FeedMetadata, FeedSnapshot};
    use crate::infra::storage::{BlobStore, MemoryBlobStore};
    use crate::util::ManualClock;

    fn maintenance(store: Arc<dyn BlobStore>, clock: Arc<ManualClock>) -> CacheMaintenance {
        let config = CacheConfig::default();
        CacheMaintenance::new(
            FeedCache::new(store.clone(), clock.clone(), &config).unwrap(),
            ArticleCache::new(store.clone(), clock.clone(), &config).unwrap(),
            TranslationCache::new(store, clock, &config),
        )
    }

    #[tokio::test]
    async fn status_reports_each_cache() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
        let maintenance = maintenance(store, clock);

        let empty = maintenance.status().await.unwrap();
        assert!(!empty.feed.exists);
        assert_eq!(empty.articles.count, 0);
        assert_eq!(empty.backend, "memory");

        maintenance
            .feeds
            .save(&FeedSnapshot {
                feed_metadata: FeedMetadata {
                    title: "Yle Uutiset".into(),
                    fetch_timestamp: "2024-01-01T00:00:00Z".into(),
                    ..FeedMetadata::default()
                },
                items: vec![Default::default(), Default::default()],
                ..FeedSnapshot::default()
            })
            .await
            .unwrap();
        maintenance
            .articles
            .save(
                "fi",
                &ArticleRecord {
                    url: "https://yle.fi/a/1".into(),
                    shortcode: "1".into(),
                    scraped_at: "2024-01-01T00:00:00Z".into(),
                    ..ArticleRecord::default()
                },
            )
            .await
            .unwrap();
        maintenance
            .translations
            .save("1", "fi", "en", &["a".to_string()], &["b".to_string()])
            .await
            .unwrap();

        let status = maintenance.status().await.unwrap();
        assert!(status.feed.exists);
        assert!(status.feed.valid);
        assert_eq!(status.feed.items_count, 2);
        assert_eq!(status.feed.title.as_deref(), Some("Yle Uutiset"));
        assert_eq!(status.articles.count, 1);
        assert_eq!(status.articles.sample, vec!["cache/yle/articles/1_fi.json"]);
        assert_eq!(status.translations.count, 1);
    }

    #[tokio::test]
    async fn scoped_sweep_only_touches_its_cache() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC)));
        let maintenance = maintenance(store, clock.clone());

        maintenance
            .translations
            .save("1", "fi", "en", &["a".to_string()], &["b".to_string()])
            .await
            .unwrap();
        maintenance
            .feeds
            .save(&FeedSnapshot::default())
            .await
            .unwrap();

        clock.set(datetime!(2024-01-02 01:00 UTC));

        let report = maintenance.sweep(SweepScope::Feeds).await.unwrap();
        assert_eq!(report.feeds, Some(1));
        assert_eq!(report.translations, None);
        assert_eq!(report.total, 1);

        let report = maintenance.sweep(SweepScope::All).await.unwrap();
        assert_eq!(report.translations, Some(1));
        assert_eq!(report.feeds, Some(0));
        assert_eq!(report.articles, Some(0));
        assert_eq!(report.total, 1);
    }
}
