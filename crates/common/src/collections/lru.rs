//! LRU map wrapper
//!
//! Wraps the `lru` crate so callers learn which entry was pushed out when the
//! map is full. The cache manager needs that to keep its eviction counters
//! and dependency bookkeeping honest.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache as ExternalLruCache;

/// Bounded least-recently-used map.
///
/// # Examples
///
/// ```
/// use toolmesh_common::collections::LruCache;
///
/// let mut cache = LruCache::with_capacity(2);
/// cache.put("key1", "value1");
/// cache.put("key2", "value2");
///
/// assert_eq!(cache.get(&"key1"), Some(&"value1"));
///
/// // key2 is now least recently used
/// assert_eq!(cache.put("key3", "value3"), Some(("key2", "value2")));
/// ```
#[derive(Debug)]
pub struct LruCache<K, V>
where
    K: Hash + Eq,
{
    inner: ExternalLruCache<K, V>,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    /// Create a new LRU map with the specified non-zero capacity
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { inner: ExternalLruCache::new(capacity) }
    }

    /// Create a new LRU map, clamping a zero capacity to one slot
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    /// Insert or replace a value.
    ///
    /// Returns the entry evicted to make room, if any. Replacing an existing
    /// key is not an eviction and returns `None`.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            return None;
        }
        self.inner.push(key, value)
    }

    /// Get a reference to a value, marking it most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get(key)
    }

    /// Get a mutable reference to a value, marking it most recently used
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.get_mut(key)
    }

    /// Peek at a value without updating recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.peek(key)
    }

    /// Mutable peek without updating recency
    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.peek_mut(key)
    }

    /// Check if a key exists without updating recency
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.contains(key)
    }

    /// Remove a key
    pub fn pop<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.pop(key)
    }

    /// Remove every entry for which `predicate` returns true.
    ///
    /// Returns the removed keys.
    pub fn retain_not<F>(&mut self, mut predicate: F) -> Vec<K>
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> =
            self.inner.iter().filter(|(k, v)| predicate(k, v)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            self.inner.pop(key);
        }
        doomed
    }

    /// Get the current number of items
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the capacity
    pub fn cap(&self) -> usize {
        self.inner.cap().get()
    }

    /// Clear all items
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Iterate most recent first, without updating recency
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Snapshot of the keys, most recent first
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.iter().map(|(k, _)| k.clone()).collect()
    }
}
