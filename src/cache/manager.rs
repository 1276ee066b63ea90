//! Expiry-aware JSON blob cache over a [`BlobStore`].
//!
//! Reads fail closed: any storage, decode or timestamp problem is a miss and
//! never an error. Writes stamp `created_at`, `expires_at` and
//! `cache_ttl_hours` and replace the blob wholesale.

use std::sync::Arc;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::infra::storage::{BlobStore, StorageError};
use crate::util::Clock;

use super::codec::{CodecError, EntryStamp, decode_entry, encode_entry};
use super::expiry::{Freshness, evaluate};
use super::keys::KeyError;

pub(crate) const METRIC_HIT: &str = "newscache_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "newscache_cache_miss_total";
pub(crate) const METRIC_SAVE: &str = "newscache_cache_save_total";
pub(crate) const METRIC_SWEPT: &str = "newscache_cache_swept_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Shared read/validate/write/sweep policy for one family of cache entries.
#[derive(Clone)]
pub struct CacheManager {
    label: &'static str,
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("label", &self.label)
            .field("backend", &self.store.backend())
            .finish()
    }
}

impl CacheManager {
    /// `label` tags log events and metrics (`feed`, `article`, `translation`).
    pub fn new(label: &'static str, store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            label,
            store,
            clock,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// `true` iff the entry at `key` exists, decodes and is fresh at `now`.
    pub async fn check_valid(&self, key: &str, ttl_hours: u32) -> bool {
        self.check_valid_with(key, ttl_hours, |_| true).await
    }

    /// Like [`check_valid`](Self::check_valid) with an additional gate over the
    /// decoded document. The gate only runs for otherwise fresh entries.
    pub async fn check_valid_with<G>(&self, key: &str, ttl_hours: u32, gate: G) -> bool
    where
        G: FnOnce(&Map<String, Value>) -> bool,
    {
        self.fresh_document(key, ttl_hours, gate).await.is_some()
    }

    /// Decoded payload at `key`, regardless of expiry.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let document = self.load(key).await?;
        self.deserialize(key, document)
    }

    /// Decoded payload at `key` only when it passes expiry and `gate`, read once.
    pub async fn get_fresh<T, G>(&self, key: &str, ttl_hours: u32, gate: G) -> Option<T>
    where
        T: DeserializeOwned,
        G: FnOnce(&Map<String, Value>) -> bool,
    {
        let document = self.fresh_document(key, ttl_hours, gate).await?;
        self.deserialize(key, document)
    }

    /// Stamp and write `payload`, returning the key written.
    pub async fn save<T>(&self, key: &str, payload: &T, ttl_hours: u32) -> Result<String, CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.save_with(key, payload, ttl_hours, &[]).await
    }

    /// [`save`](Self::save) with extra top-level fields merged into the entry.
    pub async fn save_with<T>(
        &self,
        key: &str,
        payload: &T,
        ttl_hours: u32,
        extra: &[(&str, Value)],
    ) -> Result<String, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let stamp = EntryStamp::new(self.clock.now(), ttl_hours);
        let bytes = encode_entry(payload, &stamp, extra)?;
        self.store.write(key, bytes).await?;

        counter!(METRIC_SAVE, "cache" => self.label).increment(1);
        info!(
            cache = self.label,
            key,
            ttl_hours,
            expires_at = %stamp.expires_at,
            "Saved cache entry"
        );
        Ok(key.to_string())
    }

    /// Delete every stale entry under `prefix`; returns how many were removed.
    ///
    /// Only a failure to list the prefix is an error. Entries that cannot be
    /// read, decoded or deleted are logged and skipped, and entries whose expiry
    /// cannot be determined are left in place.
    pub async fn cleanup_expired(&self, prefix: &str, ttl_hours: u32) -> Result<usize, CacheError> {
        let keys = self.store.list(prefix).await?;
        let now = self.clock.now();
        let mut deleted = 0usize;

        for key in &keys {
            let bytes = match self.store.read(key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    warn!(cache = self.label, key = %key, error = %err, "Skipping unreadable cache entry");
                    continue;
                }
            };
            let document = match decode_entry(&bytes) {
                Ok(document) => document,
                Err(err) => {
                    warn!(cache = self.label, key = %key, error = %err, "Skipping malformed cache entry");
                    continue;
                }
            };

            match evaluate(&document, now, ttl_hours) {
                Freshness::Stale => match self.store.delete(key).await {
                    Ok(()) => {
                        deleted += 1;
                        debug!(cache = self.label, key = %key, "Deleted expired cache entry");
                    }
                    Err(err) => {
                        warn!(cache = self.label, key = %key, error = %err, "Failed to delete expired cache entry");
                    }
                },
                Freshness::Undetermined => {
                    debug!(cache = self.label, key = %key, "Leaving cache entry with undetermined expiry");
                }
                Freshness::Fresh => {}
            }
        }

        if deleted > 0 {
            counter!(METRIC_SWEPT, "cache" => self.label).increment(deleted as u64);
            info!(
                cache = self.label,
                prefix,
                scanned = keys.len(),
                deleted,
                "Cleaned up expired cache entries"
            );
        }
        Ok(deleted)
    }

    async fn fresh_document<G>(
        &self,
        key: &str,
        ttl_hours: u32,
        gate: G,
    ) -> Option<Map<String, Value>>
    where
        G: FnOnce(&Map<String, Value>) -> bool,
    {
        let Some(document) = self.load(key).await else {
            self.record_miss(key, "absent");
            return None;
        };

        match evaluate(&document, self.clock.now(), ttl_hours) {
            Freshness::Fresh => {}
            other => {
                self.record_miss(key, other.as_str());
                return None;
            }
        }

        if !gate(&document) {
            self.record_miss(key, "rejected");
            return None;
        }

        counter!(METRIC_HIT, "cache" => self.label).increment(1);
        debug!(cache = self.label, key, "Cache hit");
        Some(document)
    }

    async fn load(&self, key: &str) -> Option<Map<String, Value>> {
        let bytes = match self.store.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(cache = self.label, key, error = %err, "Failed to read cache entry");
                return None;
            }
        };
        match decode_entry(&bytes) {
            Ok(document) => Some(document),
            Err(err) => {
                warn!(cache = self.label, key, error = %err, "Failed to decode cache entry");
                None
            }
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, key: &str, document: Map<String, Value>) -> Option<T> {
        match serde_json::from_value(Value::Object(document)) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(cache = self.label, key, error = %err, "Cache entry does not match expected shape");
                None
            }
        }
    }

    fn record_miss(&self, key: &str, reason: &'static str) {
        counter!(METRIC_MISS, "cache" => self.label, "reason" => reason).increment(1);
        debug!(cache = self.label, key, reason, "Cache miss");
    }
}
