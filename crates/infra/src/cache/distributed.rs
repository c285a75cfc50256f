//! Distributed tier contract and an in-memory implementation.
//!
//! A real deployment plugs in a networked backend; the manager only needs
//! get/set/delete with a per-entry TTL. Backend errors never fail a cache
//! read: the manager logs them and treats the lookup as a miss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};

use super::errors::CacheError;

/// Bytes as stored in the distributed tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    pub data: Vec<u8>,
    /// Whether `data` is compressed with the manager's codec
    pub compressed: bool,
}

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedPayload>, CacheError>;

    async fn set(&self, key: &str, payload: CachedPayload, ttl: Duration)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Release connections; later calls may fail
    async fn close(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct Stored {
    payload: Arc<CachedPayload>,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, Stored> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Stored, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stored,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local [`DistributedCache`] backed by moka
pub struct InMemoryDistributedCache {
    cache: Cache<String, Stored>,
    closed: AtomicBool,
}

impl InMemoryDistributedCache {
    pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).expire_after(PerEntryTtl).build(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Whether `key` is present and unexpired
    pub fn contains_key(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }
}

impl Default for InMemoryDistributedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<CachedPayload>, CacheError> {
        self.ensure_open()?;
        Ok(self.cache.get(key).await.map(|stored| stored.payload.as_ref().clone()))
    }

    async fn set(
        &self,
        key: &str,
        payload: CachedPayload,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.cache.insert(key.to_string(), Stored { payload: Arc::new(payload), ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Release);
        self.cache.invalidate_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &[u8]) -> CachedPayload {
        CachedPayload { data: data.to_vec(), compressed: false }
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let cache = InMemoryDistributedCache::new();
        cache.set("k", payload(b"v"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(payload(b"v")));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let cache = InMemoryDistributedCache::new();
        cache.set("short", payload(b"s"), Duration::from_millis(30)).await.unwrap();
        cache.set("long", payload(b"l"), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("long").await.unwrap(), Some(payload(b"l")));
    }

    #[tokio::test]
    async fn test_closed_backend_errors() {
        let cache = InMemoryDistributedCache::new();
        cache.close().await.unwrap();
        assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));
    }
}
