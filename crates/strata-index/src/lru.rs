//! LRU cache for decoded column extents.
//!
//! Keyed by `(object, block, seqnum)` in the read path; values are cheaply
//! cloneable (`Arc`ed vectors). Recency is a monotone tick with an ordered
//! side index, so eviction is O(log n) without unsafe pointer chains.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::Mutex;

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    capacity: usize,
    map: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some((_, old_tick)) = self.map.get(key) {
            let old_tick = *old_tick;
            self.recency.remove(&old_tick);
            self.tick += 1;
            let tick = self.tick;
            self.recency.insert(tick, key.clone());
            if let Some(entry) = self.map.get_mut(key) {
                entry.1 = tick;
            }
        }
    }
}

/// A thread-safe LRU cache returning cloned values.
#[derive(Debug)]
pub struct SyncLruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> SyncLruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: capacity.max(1),
                map: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Looks up a key, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(key) {
            inner.stats.hits += 1;
            inner.touch(key);
            inner.map.get(key).map(|(v, _)| v.clone())
        } else {
            inner.stats.misses += 1;
            None
        }
    }

    /// Inserts a value, evicting the least recently used entry when full.
    /// Returns the previous value for the key, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let prev = inner.map.insert(key.clone(), (value, tick));
        if let Some((_, old_tick)) = &prev {
            inner.recency.remove(old_tick);
        }
        inner.recency.insert(tick, key);
        while inner.map.len() > inner.capacity {
            let Some((&oldest, _)) = inner.recency.iter().next() else {
                break;
            };
            if let Some(victim) = inner.recency.remove(&oldest) {
                inner.map.remove(&victim);
                inner.stats.evictions += 1;
            }
        }
        prev.map(|(v, _)| v)
    }

    /// Removes a key.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let removed = inner.map.remove(key);
        if let Some((_, tick)) = &removed {
            inner.recency.remove(tick);
        }
        removed.map(|(v, _)| v)
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.recency.clear();
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let cache = SyncLruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"missing"), None);
    }

    #[test]
    fn test_eviction_order() {
        let cache = SyncLruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" is the LRU victim.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reinsert_updates_value() {
        let cache = SyncLruCache::new(2);
        cache.insert("a", 1);
        assert_eq!(cache.insert("a", 10), Some(1));
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = SyncLruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let cache = SyncLruCache::new(2);
        cache.insert("a", 1);
        cache.get(&"a");
        cache.get(&"x");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
