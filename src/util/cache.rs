//! Bounded LRU cache with optional time-to-live.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe LRU cache. Entries older than the TTL (if any) read as missing.
pub struct TtlLruCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> TtlLruCache<K, V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fetch a value and mark it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.get(key) {
            None => return None,
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| entry.inserted_at.elapsed() > ttl),
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.value.clone())
    }

    /// Insert a value, evicting the least recently used entry at capacity.
    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
