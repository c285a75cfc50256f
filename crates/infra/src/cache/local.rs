//! In-process tier: a bounded LRU of serialized entries with per-entry TTL.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use toolmesh_common::collections::LruCache;

use super::pattern::glob_match;

#[derive(Debug, Clone)]
pub(crate) struct LocalEntry {
    /// Uncompressed serialized value
    pub payload: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// Keys whose invalidation also invalidates this entry
    pub dependencies: HashSet<String>,
}

impl LocalEntry {
    pub(crate) fn new(payload: Arc<Vec<u8>>, ttl: Duration, now: Instant) -> Self {
        Self {
            payload,
            cached_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
            dependencies: HashSet::new(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) >= self.ttl
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(now.saturating_duration_since(self.cached_at))
    }
}

#[derive(Debug)]
pub(crate) enum LocalLookup {
    Hit(Arc<Vec<u8>>),
    Expired,
    Miss,
}

/// Read-only view of an entry for diagnostics and warmup scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub access_count: u64,
    pub remaining_ttl: Duration,
    /// Time since the last read, or since insertion if never read
    pub idle: Duration,
    pub dependencies: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct LocalTier {
    entries: Mutex<LruCache<String, LocalEntry>>,
}

impl LocalTier {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(LruCache::with_capacity(capacity)) }
    }

    /// Look up `key`, counting the access. Expired entries are evicted.
    pub(crate) fn get(&self, key: &str, now: Instant) -> LocalLookup {
        let mut entries = self.entries.lock();
        let expired = match entries.get_mut(key) {
            None => return LocalLookup::Miss,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = now;
                return LocalLookup::Hit(Arc::clone(&entry.payload));
            }
        };
        if expired {
            entries.pop(key);
        }
        LocalLookup::Expired
    }

    /// Whether a fresh entry exists, without touching its counters
    pub(crate) fn contains_fresh(&self, key: &str, now: Instant) -> bool {
        self.entries.lock().peek(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert or replace. Returns the key evicted to make room, if any.
    ///
    /// A replaced entry keeps its access count so refreshes do not reset
    /// hotness.
    pub(crate) fn insert(&self, key: String, mut entry: LocalEntry) -> Option<String> {
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.peek(key.as_str()) {
            entry.access_count = previous.access_count;
            if entry.dependencies.is_empty() {
                entry.dependencies = previous.dependencies.clone();
            }
        }
        entries.put(key, entry).map(|(evicted, _)| evicted)
    }

    /// Record `parent` on an existing entry. Missing keys are ignored.
    pub(crate) fn add_dependency(&self, key: &str, parent: &str) {
        if let Some(entry) = self.entries.lock().peek_mut(key) {
            entry.dependencies.insert(parent.to_string());
        }
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every key matching `pattern`, returning them
    pub(crate) fn remove_matching(&self, pattern: &str) -> Vec<String> {
        self.entries.lock().retain_not(|key, _| glob_match(pattern, key))
    }

    /// Fresh entries accessed more than `threshold` times that expire
    /// within `window`
    pub(crate) fn hot_near_expiry(
        &self,
        now: Instant,
        threshold: u64,
        window: Duration,
    ) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| {
                !e.is_expired(now) && e.access_count > threshold && e.remaining(now) < window
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn info(&self, key: &str, now: Instant) -> Option<EntryInfo> {
        let entries = self.entries.lock();
        let entry = entries.peek(key)?;
        let mut dependencies: Vec<String> = entry.dependencies.iter().cloned().collect();
        dependencies.sort();
        Some(EntryInfo {
            key: key.to_string(),
            access_count: entry.access_count,
            remaining_ttl: entry.remaining(now),
            idle: now.saturating_duration_since(entry.last_accessed),
            dependencies,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
