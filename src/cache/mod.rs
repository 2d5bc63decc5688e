//! Aggregate result caching.
//!
//! Aggregates are stored under a [`Fingerprint`] derived from the request.
//! Stores may fail in either direction; the engine treats a failed read as
//! a miss and a failed write as a logged no-op.

pub mod file;
pub mod memory;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;

use crate::error::Result;
use crate::models::{AggregateResult, AnalysisRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix of every cache key.
pub const CACHE_KEY_PREFIX: &str = "ai:analysis:";

/// Deterministic SHA-256 identity of an [`AnalysisRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request.
    ///
    /// Every field is length-prefixed so that moving bytes between adjacent
    /// fields always changes the digest.
    pub fn of(request: &AnalysisRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.repo_id.to_be_bytes());
        update_str(&mut hasher, &request.source);
        update_str(&mut hasher, &request.target);
        match &request.diff {
            Some(diff) => {
                hasher.update([1u8]);
                update_str(&mut hasher, diff);
            }
            None => hasher.update([0u8]),
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Full lowercase hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Key under which the aggregate is stored.
    pub fn cache_key(&self) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Key-value store for aggregates, with store-defined expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an aggregate. `Ok(None)` is a miss.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<AggregateResult>>;

    /// Store an aggregate, replacing any previous entry.
    async fn put(&self, fingerprint: &Fingerprint, aggregate: &AggregateResult) -> Result<()>;
}
