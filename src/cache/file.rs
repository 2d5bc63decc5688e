//! Directory-backed aggregate cache.
//!
//! Each entry is a JSON file named after the fingerprint, carrying its own
//! expiry so that the cache survives process restarts (one CLI invocation to
//! the next). Writes go to a temporary file first and are renamed into place,
//! so a reader never observes a half-written entry; concurrent writers for
//! the same fingerprint race and the last rename wins.

use super::{CacheStore, Fingerprint};
use crate::error::{AnalysisError, Result};
use crate::models::AggregateResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const MAX_TTL_DAYS: i64 = 365 * 100;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    result: AggregateResult,
}

/// Aggregate cache persisted as one JSON file per fingerprint.
#[derive(Debug)]
pub struct FileCacheStore {
    directory: PathBuf,
    ttl: chrono::Duration,
    tmp_counter: AtomicU64,
}

impl FileCacheStore {
    pub fn new(directory: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            directory: directory.into(),
            ttl: chrono::Duration::from_std(ttl)
                .map(|ttl| ttl.min(chrono::Duration::days(MAX_TTL_DAYS)))
                .unwrap_or_else(|_| chrono::Duration::days(MAX_TTL_DAYS)),
            tmp_counter: AtomicU64::new(0),
        }
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.directory.join(format!("{}.json", fingerprint.as_str()))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AggregateResult>> {
        let path = self.entry_path(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AnalysisError::CacheRead(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| {
            AnalysisError::CacheRead(format!("{}: corrupt entry: {}", path.display(), e))
        })?;

        if entry.expires_at <= Utc::now() {
            debug!("Cache entry {} expired at {}", fingerprint.short(), entry.expires_at);
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(entry.result))
    }

    async fn put(&self, fingerprint: &Fingerprint, aggregate: &AggregateResult) -> Result<()> {
        let write_err = |e: std::io::Error| AnalysisError::CacheWrite(e.to_string());

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(write_err)?;

        let stored_at = Utc::now();
        let entry = CacheEntry {
            key: fingerprint.cache_key(),
            stored_at,
            expires_at: stored_at + self.ttl,
            result: aggregate.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)
            .map_err(|e| AnalysisError::CacheWrite(e.to_string()))?;

        let path = self.entry_path(fingerprint);
        let tmp = self.directory.join(format!(
            ".{}.{}.{}.tmp",
            fingerprint.as_str(),
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!("Cached aggregate {} at {}", fingerprint.short(), path.display());
        Ok(())
    }
}
