//! Two-tier cache manager
//!
//! Values cross a serde_json boundary, so the engine itself only ever sees
//! bytes. Reads go local tier, then distributed tier (promoting hits);
//! writes go to both. `get_or_set` coalesces concurrent misses for the same
//! key into a single loader call.
//!
//! Each shared structure (local tier, in-flight table, dependency graph,
//! metrics) carries its own lock and none is held across an await.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolmesh_common::compression::CompressionService;
use toolmesh_common::resilience::{SharedClock, SystemClock};
use toolmesh_domain::config::CacheConfig;
use tracing::{debug, info, instrument, warn};

use super::coalesce::{InFlightTable, LoadOutcome, Role};
use super::dependency::DependencyGraph;
use super::distributed::{CachedPayload, DistributedCache};
use super::errors::CacheError;
use super::local::{EntryInfo, LocalEntry, LocalLookup, LocalTier};
use super::metrics::{CacheMetrics, CacheMetricsRecorder};
use super::warmup::{
    scan_loop, worker_loop, LoadFuture, RegisteredLoader, SharedLoader, WarmupJob,
    WarmupPriority, WarmupQueue,
};

/// Type alias for task handles to avoid complexity warnings
type TaskHandles = Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>;

pub(crate) struct CacheShared {
    pub(crate) config: CacheConfig,
    local: LocalTier,
    distributed: Arc<dyn DistributedCache>,
    in_flight: Arc<InFlightTable>,
    graph: DependencyGraph,
    pub(crate) metrics: CacheMetricsRecorder,
    compression: Option<CompressionService>,
    clock: SharedClock,
    loaders: Mutex<HashMap<String, RegisteredLoader>>,
    pub(crate) warmup: WarmupQueue,
}

impl CacheShared {
    pub(crate) fn is_cached(&self, key: &str) -> bool {
        self.local.contains_fresh(key, self.clock.now())
    }

    /// Serialized value for `key` from the first tier that has it
    async fn lookup(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match self.local.get(key, self.clock.now()) {
            LocalLookup::Hit(bytes) => {
                self.metrics.update(|m| m.l1_hits += 1);
                return Some(bytes);
            }
            LocalLookup::Expired => {
                debug!(key, "local entry expired");
                self.metrics.update(|m| m.l1_misses += 1);
            }
            LocalLookup::Miss => self.metrics.update(|m| m.l1_misses += 1),
        }

        let payload = match self.distributed.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.metrics.update(|m| m.l2_misses += 1);
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "distributed cache read failed, treating as miss");
                self.metrics.update(|m| m.l2_errors += 1);
                return None;
            }
        };

        let bytes = match self.unpack(payload) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable distributed entry");
                self.metrics.update(|m| m.l2_errors += 1);
                return None;
            }
        };

        self.metrics.update(|m| m.l2_hits += 1);
        let entry = LocalEntry::new(Arc::clone(&bytes), self.config.l1_ttl, self.clock.now());
        self.insert_local(key, entry);
        Some(bytes)
    }

    fn unpack(&self, payload: CachedPayload) -> Result<Vec<u8>, CacheError> {
        if !payload.compressed {
            return Ok(payload.data);
        }
        let data = match &self.compression {
            Some(codec) => codec.decompress(&payload.data)?,
            None => CompressionService::default().decompress(&payload.data)?,
        };
        Ok(data)
    }

    fn pack(&self, key: &str, bytes: &[u8]) -> CachedPayload {
        if let Some(codec) = &self.compression {
            match codec.compress_if_smaller(bytes, self.config.compression_min_size) {
                Ok(Some(compressed)) => {
                    self.metrics.record_compression(bytes.len(), compressed.len());
                    return CachedPayload { data: compressed, compressed: true };
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "compression failed, storing raw"),
            }
        }
        CachedPayload { data: bytes.to_vec(), compressed: false }
    }

    fn insert_local(&self, key: &str, entry: LocalEntry) {
        if let Some(evicted) = self.local.insert(key.to_string(), entry) {
            debug!(key = %evicted, "local entry evicted");
            self.metrics.update(|m| m.evictions += 1);
        }
    }

    /// Write-through to both tiers. Tier failures are logged, not returned.
    pub(crate) async fn store(
        &self,
        key: &str,
        bytes: Arc<Vec<u8>>,
        ttl: Duration,
        dependencies: Vec<String>,
    ) {
        let mut entry = LocalEntry::new(Arc::clone(&bytes), ttl, self.clock.now());
        entry.dependencies.extend(dependencies);
        self.insert_local(key, entry);

        let payload = self.pack(key, &bytes);
        let l2_ttl = ttl.max(self.config.l2_ttl);
        if let Err(e) = self.distributed.set(key, payload, l2_ttl).await {
            warn!(key, error = %e, "distributed cache write failed");
            self.metrics.update(|m| m.l2_errors += 1);
        }
        self.metrics.update(|m| m.sets += 1);
    }

    async fn remove_everywhere(&self, key: &str) {
        self.local.remove(key);
        if let Err(e) = self.distributed.delete(key).await {
            warn!(key, error = %e, "distributed cache delete failed");
            self.metrics.update(|m| m.l2_errors += 1);
        }
    }

    /// Queue refreshes for hot entries close to expiry. Returns how many
    /// were queued.
    pub(crate) fn scan_hot_entries(&self) -> usize {
        let candidates = self.local.hot_near_expiry(
            self.clock.now(),
            self.config.hot_access_threshold,
            self.config.near_expiry_window,
        );
        if candidates.is_empty() {
            return 0;
        }
        self.metrics.update(|m| m.warmup_candidates += candidates.len() as u64);

        let mut queued = 0;
        for key in candidates {
            let registered = self.loaders.lock().get(&key).cloned();
            let Some(RegisteredLoader { loader, ttl }) = registered else {
                debug!(key = %key, "hot entry near expiry has no warmup loader");
                continue;
            };
            let job = WarmupJob { key, ttl, force: true, load: loader() };
            if self.enqueue(job, WarmupPriority::High) {
                queued += 1;
            }
        }
        queued
    }

    fn enqueue(&self, job: WarmupJob, priority: WarmupPriority) -> bool {
        self.metrics.update(|m| m.warmup_requests += 1);
        match self.warmup.try_push(job, priority) {
            Ok(()) => true,
            Err(job) => {
                debug!(key = %job.key, ?priority, "warmup queue full, dropping job");
                self.metrics.update(|m| m.warmup_dropped += 1);
                false
            }
        }
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value)
        .map_err(|e| CacheError::Serialize { key: key.to_string(), message: e.to_string() })
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(bytes)
        .map_err(|e| CacheError::Deserialize { key: key.to_string(), message: e.to_string() })
}

fn boxed_loader<T, F, Fut, E>(loader: F) -> LoadFuture
where
    T: Serialize,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: fmt::Display,
{
    Box::pin(async move {
        let value = loader().await.map_err(|e| e.to_string())?;
        serde_json::to_vec(&value).map_err(|e| e.to_string())
    })
}

/// Two-tier cache with coalescing, cascading invalidation and warmup
pub struct CacheManager {
    shared: Arc<CacheShared>,
    cancel: CancellationToken,
    tasks: TaskHandles,
}

impl CacheManager {
    /// Create a manager on the system clock
    pub fn new(config: CacheConfig, distributed: Arc<dyn DistributedCache>) -> Self {
        Self::with_clock(config, distributed, Arc::new(SystemClock))
    }

    /// Create a manager whose local TTLs are measured with `clock`
    pub fn with_clock(
        config: CacheConfig,
        distributed: Arc<dyn DistributedCache>,
        clock: SharedClock,
    ) -> Self {
        let compression = config
            .compression_enabled
            .then(|| CompressionService::gzip(config.compression_level));

        let shared = CacheShared {
            local: LocalTier::new(config.l1_max_size),
            distributed,
            in_flight: Arc::new(InFlightTable::default()),
            graph: DependencyGraph::default(),
            metrics: CacheMetricsRecorder::default(),
            compression,
            clock,
            loaders: Mutex::new(HashMap::new()),
            warmup: WarmupQueue::new(config.warmup_queue_size),
            config,
        };

        Self {
            shared: Arc::new(shared),
            cancel: CancellationToken::new(),
            tasks: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }

    /// Spawn the warmup workers and the periodic scan.
    ///
    /// Does nothing when warmup is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::AlreadyRunning`] on a second call and
    /// [`CacheError::Closed`] after [`close`](Self::close).
    pub async fn start(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        if !self.shared.config.warmup_enabled {
            debug!("cache warmup disabled");
            return Ok(());
        }

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(CacheError::AlreadyRunning);
        }

        let workers = self.shared.config.warmup_workers.max(1);
        for id in 0..workers {
            let shared = Arc::clone(&self.shared);
            let cancel = self.cancel.clone();
            tasks.push(tokio::spawn(worker_loop(id, shared, cancel)));
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.shared.config.warmup_interval;
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(scan_loop(shared, interval, cancel)));

        info!(workers, interval_ms = interval.as_millis() as u64, "cache warmup started");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.cancel.is_cancelled() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    /// Read `key`, trying the local tier then the distributed tier.
    ///
    /// A miss is `Ok(None)`. Distributed tier failures count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.ensure_open()?;
        match self.shared.lookup(key).await {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write `value` to both tiers.
    ///
    /// The distributed tier keeps it for at least `l2_ttl`.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set_with_dependencies(key, value, ttl, &[]).await
    }

    /// Write `value` and record that invalidating any of `dependencies`
    /// must also invalidate `key`.
    pub async fn set_with_dependencies<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        dependencies: &[&str],
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        let bytes = encode(key, value)?;
        for parent in dependencies {
            self.shared.graph.add(parent, key);
        }
        let dependencies = dependencies.iter().map(|d| (*d).to_string()).collect();
        self.shared.store(key, Arc::new(bytes), ttl, dependencies).await;
        Ok(())
    }

    /// Cache-aside read with request coalescing.
    ///
    /// On a miss exactly one caller runs `loader`; concurrent callers for
    /// the same key wait for its outcome. Only successful loads are cached.
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.coalesced(key, loader, ttl, None).await
    }

    /// [`get_or_set`](Self::get_or_set) that gives up when `cancel` fires.
    ///
    /// Only the cancelled caller receives [`CacheError::Cancelled`]. When
    /// that caller was leading the load, the next waiting caller takes over
    /// with its own loader, so other waiters still get a value.
    pub async fn get_or_set_with_cancel<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.coalesced(key, loader, ttl, Some(cancel)).await
    }

    async fn coalesced<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.ensure_open()?;
        if let Some(bytes) = self.shared.lookup(key).await {
            return decode(key, &bytes);
        }

        let mut counted = false;
        let leader = loop {
            let follower = match self.shared.in_flight.join(key) {
                Role::Leader(guard) => break guard,
                Role::Follower(follower) => follower,
            };
            if !counted {
                counted = true;
                self.shared.metrics.update(|m| m.coalesced_requests += 1);
            }
            let outcome = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => {
                        return Err(CacheError::Cancelled { key: key.to_string() });
                    }
                    outcome = follower.wait() => outcome,
                },
                None => follower.wait().await,
            };
            match outcome {
                LoadOutcome::Loaded(bytes) => return decode(key, &bytes),
                LoadOutcome::Failed(message) => {
                    return Err(CacheError::Loader { key: key.to_string(), message });
                }
                // The leader went away; rejoin and possibly take over the load.
                LoadOutcome::Cancelled => {
                    debug!(key, "coalescing leader abandoned load, rejoining");
                }
            }
        };

        // A previous leader may have filled the cache between our miss and
        // taking the lead.
        if let LocalLookup::Hit(bytes) = self.shared.local.get(key, self.shared.clock.now()) {
            leader.complete(LoadOutcome::Loaded(Arc::clone(&bytes)));
            return decode(key, &bytes);
        }

        let result = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => {
                    // Dropping the guard hands the load to a waiting follower.
                    return Err(CacheError::Cancelled { key: key.to_string() });
                }
                result = loader() => result,
            },
            None => loader().await,
        };

        match result {
            Ok(value) => {
                let bytes = match encode(key, &value) {
                    Ok(bytes) => Arc::new(bytes),
                    Err(e) => {
                        leader.complete(LoadOutcome::Failed(e.to_string()));
                        return Err(e);
                    }
                };
                self.shared.store(key, Arc::clone(&bytes), ttl, Vec::new()).await;
                leader.complete(LoadOutcome::Loaded(bytes));
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                debug!(key, error = %message, "cache loader failed");
                leader.complete(LoadOutcome::Failed(message.clone()));
                Err(CacheError::Loader { key: key.to_string(), message })
            }
        }
    }

    /// Remove `key` from both tiers, then everything that depends on it,
    /// transitively.
    ///
    /// Returns the number of dependent keys removed by the cascade.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) -> Result<usize, CacheError> {
        self.ensure_open()?;
        self.shared.remove_everywhere(key).await;

        let cascade = self.shared.graph.take_cascade(key);
        for dependent in &cascade {
            self.shared.remove_everywhere(dependent).await;
        }

        let cascaded = cascade.len();
        self.shared.metrics.update(|m| {
            m.invalidations += 1;
            m.cascade_invalidations += cascaded as u64;
        });
        if cascaded > 0 {
            debug!(key, cascaded, "cascading invalidation");
        }
        Ok(cascaded)
    }

    /// Remove every local key matching `pattern` from both tiers.
    ///
    /// `*` matches any run of characters; `tools:*`, `*:health` and
    /// `*acme*` are all valid. Returns the number of keys removed.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.ensure_open()?;
        let removed = self.shared.local.remove_matching(pattern);
        for key in &removed {
            if let Err(e) = self.shared.distributed.delete(key).await {
                warn!(key = %key, error = %e, "distributed cache delete failed");
                self.shared.metrics.update(|m| m.l2_errors += 1);
            }
        }
        let count = removed.len();
        self.shared.metrics.update(|m| m.invalidations += count as u64);
        Ok(count)
    }

    /// Invalidating `parent` will also invalidate `child`. Idempotent.
    pub fn add_dependency(&self, parent: &str, child: &str) {
        if self.shared.graph.add(parent, child) {
            self.shared.local.add_dependency(child, parent);
        }
    }

    /// Queue a background load of `key` without waiting.
    ///
    /// Skipped by the worker if `key` is cached by the time it runs.
    /// Returns false if the queue was full and the job was dropped.
    pub fn warm_cache<T, F, Fut, E>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
        priority: WarmupPriority,
    ) -> bool
    where
        T: Serialize,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        let job =
            WarmupJob { key: key.to_string(), ttl, force: false, load: boxed_loader(loader) };
        self.shared.enqueue(job, priority)
    }

    /// Register how to reload `key`, so periodic scans can refresh it
    /// while it is hot.
    pub fn register_warmup_loader<T, F, Fut, E>(&self, key: &str, loader: F, ttl: Duration)
    where
        T: Serialize,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display,
    {
        let loader = Arc::new(loader);
        let shared: SharedLoader = Arc::new(move || {
            let loader = Arc::clone(&loader);
            boxed_loader(move || loader())
        });
        self.shared
            .loaders
            .lock()
            .insert(key.to_string(), RegisteredLoader { loader: shared, ttl });
    }

    /// Run one hot-entry scan now. Returns how many refreshes were queued.
    pub fn run_warmup_scan(&self) -> usize {
        self.shared.scan_hot_entries()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.shared.metrics.snapshot()
    }

    /// Counters and TTL of a local entry
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.shared.local.info(key, self.shared.clock.now())
    }

    /// Entries in the local tier
    pub fn local_len(&self) -> usize {
        self.shared.local.len()
    }

    /// Keys with a coalesced load in progress
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Children recorded for `parent`
    pub fn dependents(&self, parent: &str) -> Vec<String> {
        self.shared.graph.children(parent)
    }

    /// Stop the warmup workers and scan, wait for them, and close the
    /// distributed tier.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("cache background task panicked: {}", e),
                Err(_) => warn!("cache background task did not complete within timeout"),
            }
        }

        if let Err(e) = self.shared.distributed.close().await {
            warn!(error = %e, "failed to close distributed cache");
        }
        self.shared.local.clear();
        self.shared.graph.clear();
        info!("cache manager closed");
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            warn!("CacheManager dropped without close; cancelling background tasks");
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::Deserialize;
    use toolmesh_common::resilience::MockClock;

    use super::*;
    use crate::cache::InMemoryDistributedCache;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        name: String,
    }

    fn item(id: u32) -> Item {
        Item { id, name: format!("item-{id}") }
    }

    fn config() -> CacheConfig {
        CacheConfig { warmup_enabled: false, ..Default::default() }
    }

    fn manager_with_clock(config: CacheConfig) -> (CacheManager, MockClock, Arc<InMemoryDistributedCache>) {
        let clock = MockClock::new();
        let l2 = Arc::new(InMemoryDistributedCache::new());
        let manager = CacheManager::with_clock(config, l2.clone(), Arc::new(clock.clone()));
        (manager, clock, l2)
    }

    /// Distributed tier that fails every call
    struct BrokenBackend;

    #[async_trait]
    impl DistributedCache for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<CachedPayload>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn set(&self, _: &str, _: CachedPayload, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn close(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (cache, _clock, _l2) = manager_with_clock(config());

        cache.set("tool:1", &item(1), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get::<Item>("tool:1").await.unwrap(), Some(item(1)));
        assert_eq!(cache.get::<Item>("tool:2").await.unwrap(), None);
        let metrics = cache.metrics();
        assert_eq!(metrics.l1_hits, 1);
        assert_eq!(metrics.l1_misses, 1);
        assert_eq!(metrics.l2_misses, 1);
    }

    /// Validates promotion from the distributed tier.
    ///
    /// Assertions:
    /// - An expired local entry is a local miss.
    /// - The distributed copy (kept for at least `l2_ttl`) is returned.
    /// - The value is promoted back into the local tier.
    #[tokio::test]
    async fn test_local_expiry_promotes_from_distributed() {
        let (cache, clock, _l2) = manager_with_clock(config());

        cache.set("tool:1", &item(1), Duration::from_secs(10)).await.unwrap();
        clock.advance_secs(11);

        assert_eq!(cache.get::<Item>("tool:1").await.unwrap(), Some(item(1)));
        let metrics = cache.metrics();
        assert_eq!(metrics.l1_misses, 1);
        assert_eq!(metrics.l2_hits, 1);
        assert!(cache.entry_info("tool:1").is_some());
    }

    #[tokio::test]
    async fn test_expires_from_both_tiers() {
        let config = CacheConfig { l2_ttl: Duration::from_millis(40), ..config() };
        let cache = CacheManager::new(config, Arc::new(InMemoryDistributedCache::new()));

        cache.set("k", &item(1), Duration::from_millis(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.get::<Item>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed_in_distributed_tier() {
        let config = CacheConfig { compression_min_size: 64, ..config() };
        let (cache, _clock, l2) = manager_with_clock(config);
        let big: Vec<String> = (0..200).map(|_| "repeated-text".to_string()).collect();

        cache.set("big", &big, Duration::from_secs(60)).await.unwrap();
        cache.set("small", &"x", Duration::from_secs(60)).await.unwrap();

        assert!(l2.get("big").await.unwrap().unwrap().compressed);
        assert!(!l2.get("small").await.unwrap().unwrap().compressed);
        assert!(cache.metrics().compression_ratio() > 0.5);

        // Force a read through the distributed tier.
        cache.shared.local.clear();
        assert_eq!(cache.get::<Vec<String>>("big").await.unwrap(), Some(big));
    }

    #[tokio::test]
    async fn test_backend_errors_are_misses() {
        let cache = CacheManager::new(config(), Arc::new(BrokenBackend));

        cache.set("k", &item(1), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<Item>("k").await.unwrap(), Some(item(1)));
        assert_eq!(cache.get::<Item>("other").await.unwrap(), None);
        assert_eq!(cache.invalidate("k").await.unwrap(), 0);
        assert!(cache.metrics().l2_errors >= 3);
    }

    /// Validates request coalescing.
    ///
    /// Assertions:
    /// - Ten concurrent callers trigger exactly one loader call.
    /// - All callers see the same value.
    /// - Nothing is left in flight afterwards.
    #[tokio::test]
    async fn test_concurrent_get_or_set_coalesces() {
        let cache = Arc::new(CacheManager::new(config(), Arc::new(InMemoryDistributedCache::new())));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set(
                        "tool:42",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(item(42))
                        },
                        Duration::from_secs(60),
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), item(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_loader_error_is_shared_and_not_cached() {
        let cache = Arc::new(CacheManager::new(config(), Arc::new(InMemoryDistributedCache::new())));

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set(
                        "k",
                        || async {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err::<Item, _>("backend down")
                        },
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = cache
            .get_or_set("k", || async { Ok::<_, String>(item(1)) }, Duration::from_secs(60))
            .await;

        assert!(matches!(leader.await.unwrap(), Err(CacheError::Loader { .. })));
        match follower {
            Err(CacheError::Loader { message, .. }) => assert_eq!(message, "backend down"),
            other => panic!("expected shared loader error, got {:?}", other),
        }
        assert_eq!(cache.get::<Item>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_follower_returns_promptly() {
        let cache = Arc::new(CacheManager::new(config(), Arc::new(InMemoryDistributedCache::new())));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set(
                        "k",
                        || async {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok::<_, String>(item(1))
                        },
                        Duration::from_secs(60),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let token = CancellationToken::new();
        token.cancel();
        let result = cache
            .get_or_set_with_cancel("k", || async { Ok::<_, String>(item(2)) }, Duration::from_secs(60), &token)
            .await;

        assert!(matches!(result, Err(CacheError::Cancelled { .. })));
        assert_eq!(slow.await.unwrap().unwrap(), item(1));
    }

    /// Validates that cancelling the leading caller does not fail its waiters.
    ///
    /// # Test Steps
    /// 1. A cancellable caller starts a slow load and a plain caller joins it
    /// 2. The leader's token fires mid-load
    /// 3. Only the leader sees `Cancelled`; the waiter takes over and gets a value
    #[tokio::test]
    async fn test_cancelled_leader_hands_load_to_waiter() {
        let cache = Arc::new(CacheManager::new(config(), Arc::new(InMemoryDistributedCache::new())));
        let token = CancellationToken::new();

        let leader = {
            let cache = Arc::clone(&cache);
            let token = token.clone();
            tokio::spawn(async move {
                cache
                    .get_or_set_with_cancel(
                        "k",
                        || async {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok::<_, String>(item(1))
                        },
                        Duration::from_secs(60),
                        &token,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set("k", || async { Ok::<_, String>(item(2)) }, Duration::from_secs(60))
                    .await
            })
        };
        tokio::time::timeout(Duration::from_secs(1), async {
            while cache.shared.in_flight.waiters("k") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();

        assert!(matches!(leader.await.unwrap(), Err(CacheError::Cancelled { .. })));
        assert_eq!(follower.await.unwrap().unwrap(), item(2));
        assert_eq!(cache.get::<Item>("k").await.unwrap(), Some(item(2)));
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.metrics().coalesced_requests, 1);
    }

    /// Validates the A -> B -> C cascade.
    ///
    /// Assertions:
    /// - Invalidating A removes B and C from the cache.
    /// - An unrelated key survives.
    #[tokio::test]
    async fn test_cascading_invalidation() {
        let (cache, _clock, l2) = manager_with_clock(config());
        let ttl = Duration::from_secs(60);

        cache.set("a", &item(1), ttl).await.unwrap();
        cache.set_with_dependencies("b", &item(2), ttl, &["a"]).await.unwrap();
        cache.set("c", &item(3), ttl).await.unwrap();
        cache.add_dependency("b", "c");
        cache.add_dependency("b", "c");
        cache.set("d", &item(4), ttl).await.unwrap();

        assert_eq!(cache.entry_info("c").unwrap().dependencies, vec!["b".to_string()]);
        assert_eq!(cache.invalidate("a").await.unwrap(), 2);

        for key in ["a", "b", "c"] {
            assert_eq!(cache.get::<Item>(key).await.unwrap(), None, "{key} should be gone");
            assert!(l2.get(key).await.unwrap().is_none());
        }
        assert_eq!(cache.get::<Item>("d").await.unwrap(), Some(item(4)));
        assert!(cache.dependents("a").is_empty());
        assert_eq!(cache.metrics().cascade_invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_pattern() {
        let (cache, _clock, l2) = manager_with_clock(config());
        let ttl = Duration::from_secs(60);
        for key in ["tools:acme", "tools:globex", "tool:1"] {
            cache.set(key, &item(1), ttl).await.unwrap();
        }

        assert_eq!(cache.invalidate_pattern("tools:*").await.unwrap(), 2);
        assert!(l2.get("tools:acme").await.unwrap().is_none());
        assert_eq!(cache.get::<Item>("tool:1").await.unwrap(), Some(item(1)));
        assert_eq!(cache.invalidate_pattern("*:1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_counted() {
        let config = CacheConfig { l1_max_size: 2, ..config() };
        let (cache, _clock, _l2) = manager_with_clock(config);
        let ttl = Duration::from_secs(60);

        for i in 0..3 {
            cache.set(&format!("k{i}"), &item(i), ttl).await.unwrap();
        }
        assert_eq!(cache.local_len(), 2);
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[tokio::test]
    async fn test_warm_cache_loads_in_background() {
        let config = CacheConfig { warmup_enabled: true, ..Default::default() };
        let cache = CacheManager::new(config, Arc::new(InMemoryDistributedCache::new()));
        cache.start().await.unwrap();
        assert!(matches!(cache.start().await, Err(CacheError::AlreadyRunning)));

        assert!(cache.warm_cache(
            "tool:7",
            || async { Ok::<_, String>(item(7)) },
            Duration::from_secs(60),
            WarmupPriority::High,
        ));

        for _ in 0..100 {
            if cache.metrics().warmup_successes == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.metrics().warmup_successes, 1);
        assert_eq!(cache.get::<Item>("tool:7").await.unwrap(), Some(item(7)));

        cache.close().await;
        assert!(matches!(cache.get::<Item>("tool:7").await, Err(CacheError::Closed)));
    }

    #[tokio::test]
    async fn test_full_warmup_queue_drops_jobs() {
        // Workers are never started, so nothing drains the queue.
        let config = CacheConfig { warmup_queue_size: 1, ..config() };
        let cache = CacheManager::new(config, Arc::new(InMemoryDistributedCache::new()));
        let ttl = Duration::from_secs(60);

        assert!(cache.warm_cache("a", || async { Ok::<_, String>(1) }, ttl, WarmupPriority::Normal));
        assert!(!cache.warm_cache("b", || async { Ok::<_, String>(2) }, ttl, WarmupPriority::Low));
        assert!(!cache.warm_cache("c", || async { Ok::<_, String>(3) }, ttl, WarmupPriority::High));

        let metrics = cache.metrics();
        assert_eq!(metrics.warmup_requests, 3);
        assert_eq!(metrics.warmup_dropped, 2);
    }

    /// Validates the periodic hot-entry scan.
    ///
    /// Assertions:
    /// - Entries accessed more than the threshold and close to expiry are
    ///   candidates.
    /// - Only candidates with a registered loader are queued.
    #[tokio::test]
    async fn test_warmup_scan_queues_registered_hot_keys() {
        let (cache, clock, _l2) = manager_with_clock(config());
        let ttl = Duration::from_secs(120);

        cache.set("hot", &item(1), ttl).await.unwrap();
        cache.set("hot-unregistered", &item(2), ttl).await.unwrap();
        for _ in 0..6 {
            cache.get::<Item>("hot").await.unwrap();
            cache.get::<Item>("hot-unregistered").await.unwrap();
        }
        cache.register_warmup_loader("hot", || async { Ok::<_, String>(item(10)) }, ttl);

        assert_eq!(cache.run_warmup_scan(), 0);

        clock.advance_secs(90);
        assert_eq!(cache.run_warmup_scan(), 1);
        let metrics = cache.metrics();
        assert_eq!(metrics.warmup_candidates, 2);
        assert_eq!(metrics.warmup_requests, 1);
    }
}
