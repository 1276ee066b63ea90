//! Feed snapshot retrieval through the feed cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::application::articles::SourceError;
use crate::application::error::AppError;
use crate::application::rate_limit::QuotaGate;
use crate::cache::{FeedCache, SingleFlight};
use crate::domain::FeedSnapshot;

/// Produces a parsed snapshot of the configured feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<FeedSnapshot, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedLoad {
    pub cached: bool,
    #[serde(flatten)]
    pub snapshot: FeedSnapshot,
}

pub struct FeedService {
    cache: FeedCache,
    source: Arc<dyn FeedSource>,
    quota: QuotaGate,
    flights: SingleFlight<Result<FeedSnapshot, SourceError>>,
    sweep_on_request: bool,
}

impl FeedService {
    pub fn new(
        cache: FeedCache,
        source: Arc<dyn FeedSource>,
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

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// Return the cached snapshot while it is fresh, unless `force_reload`.
    pub async fn load(&self, force_reload: bool) -> Result<FeedLoad, AppError> {
        if self.sweep_on_request
            && let Err(err) = self.cache.cleanup_expired().await
        {
            warn!(error = %err, "Feed cache sweep failed");
        }

        if !force_reload && let Some(snapshot) = self.cache.get_fresh().await {
            info!(key = self.cache.key(), items = snapshot.items.len(), "Returning cached feed");
            return Ok(FeedLoad {
                cached: true,
                snapshot,
            });
        }

        self.quota.check().await?;

        let flight = self
            .flights
            .run(self.cache.key(), || self.fetch_and_store())
            .await;
        if flight.leader && flight.value.is_ok() {
            self.quota.record().await;
        }

        let snapshot = flight.value?;
        info!(items = snapshot.items.len(), force_reload, "Feed refreshed");
        Ok(FeedLoad {
            cached: false,
            snapshot,
        })
    }

    async fn fetch_and_store(&self) -> Result<FeedSnapshot, SourceError> {
        let snapshot = self.source.fetch().await?;
        if let Err(err) = self.cache.save(&snapshot).await {
            warn!(error = %err, "Failed to cache feed");
        }
        Ok(snapshot)
    }
}
