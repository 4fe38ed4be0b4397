//! Content-addressed cache of optimized images using moka
//!
//! Entries are keyed by the blake3 hash of the source bytes together with the
//! signature of the profile they were optimized under, so identical inputs
//! under an identical profile are compressed once and reused across jobs.

use crate::models::OptimizedImage;
use crate::Result;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 32-byte blake3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the JSON encoding of a value.
    pub fn compute_serializable<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::compute(&json))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 16 hex characters, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content: ContentHash,
    pub profile: ContentHash,
}

impl CacheKey {
    pub fn new(data: &[u8], profile_signature: ContentHash) -> Self {
        Self {
            content: ContentHash::compute(data),
            profile: profile_signature,
        }
    }
}

/// Result of a get-or-compute call.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub image: Arc<OptimizedImage>,
    /// False when this call ran the computation itself.
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entry_count: u64,
}

/// Shared compressed-image cache.
///
/// Constructed once by the process and handed to every coordinator; clones
/// share the same storage.
#[derive(Clone)]
pub struct CompressionCache {
    inner: Cache<CacheKey, Arc<OptimizedImage>>,
}

impl CompressionCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<OptimizedImage>> {
        self.inner.get(key).await
    }

    /// Return the cached image for `key`, or run `compute` and store its
    /// output.
    ///
    /// Concurrent callers for the same key wait on a single computation.
    /// Errors are shared with those waiters but never stored.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> std::result::Result<CacheLookup, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<OptimizedImage, E>>,
        E: Send + Sync + 'static,
    {
        let entry = self
            .inner
            .entry(key)
            .or_try_insert_with(async move { compute().await.map(Arc::new) })
            .await?;

        Ok(CacheLookup {
            hit: !entry.is_fresh(),
            image: entry.into_value(),
        })
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Flush moka's pending maintenance so counts are exact.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for CompressionCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
