//! In-process aggregate cache backed by moka.

use super::{CacheStore, Fingerprint};
use crate::error::Result;
use crate::models::AggregateResult;
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// Bounded in-memory cache with time-to-live expiry.
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    inner: Cache<String, AggregateResult>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AggregateResult>> {
        Ok(self.inner.get(&fingerprint.cache_key()).await)
    }

    async fn put(&self, fingerprint: &Fingerprint, aggregate: &AggregateResult) -> Result<()> {
        self.inner
            .insert(fingerprint.cache_key(), aggregate.clone())
            .await;
        Ok(())
    }
}
