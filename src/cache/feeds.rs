//! Feed snapshot cache: one blob per configured feed.

use std::sync::Arc;

use crate::domain::FeedSnapshot;
use crate::infra::storage::BlobStore;
use crate::util::Clock;

use super::config::CacheConfig;
use super::keys::{self, KeyError};
use super::manager::{CacheError, CacheManager};

#[derive(Debug, Clone)]
pub struct FeedCache {
    manager: CacheManager,
    key: String,
    prefix: String,
    ttl_hours: u32,
}

impl FeedCache {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Result<Self, KeyError> {
        Ok(Self {
            manager: CacheManager::new("feed", store, clock),
            key: keys::feed_key(&config.source, &config.feed_name)?,
            prefix: keys::source_prefix(&config.source)?,
            ttl_hours: config.feed_ttl_hours,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Sweep prefix. It spans the whole source, so article entries are swept by feed ttl too.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl_hours(&self) -> u32 {
        self.ttl_hours
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub async fn check_valid(&self) -> bool {
        self.manager.check_valid(&self.key, self.ttl_hours).await
    }

    /// Stored snapshot, fresh or not.
    pub async fn get(&self) -> Option<FeedSnapshot> {
        self.manager.get(&self.key).await
    }

    /// Stored snapshot only while it is fresh.
    pub async fn get_fresh(&self) -> Option<FeedSnapshot> {
        self.manager
            .get_fresh(&self.key, self.ttl_hours, |_| true)
            .await
    }

    pub async fn save(&self, snapshot: &FeedSnapshot) -> Result<String, CacheError> {
        self.manager.save(&self.key, snapshot, self.ttl_hours).await
    }

    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        self.manager
            .cleanup_expired(&self.prefix, self.ttl_hours)
            .await
    }
}
