//! Cooldown circuit breaker.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Per-key breaker: a tripped key stays open until its cooldown elapses.
#[derive(Debug)]
pub struct CooldownBreaker<K: Hash + Eq> {
    open_until: Mutex<HashMap<K, Instant>>,
}

impl<K: Hash + Eq> Default for CooldownBreaker<K> {
    fn default() -> Self {
        Self {
            open_until: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Hash + Eq> CooldownBreaker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is inside a cooldown window. Expired entries are dropped.
    pub fn is_open(&self, key: &K) -> bool {
        let mut open_until = self.open_until.lock();
        match open_until.get(key) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                open_until.remove(key);
                false
            }
            None => false,
        }
    }

    /// Open the breaker for `cooldown`. A zero cooldown is a no-op.
    pub fn trip(&self, key: K, cooldown: Duration) {
        if cooldown.is_zero() {
            return;
        }
        self.open_until.lock().insert(key, Instant::now() + cooldown);
    }

    pub fn reset(&self, key: &K) {
        self.open_until.lock().remove(key);
    }

    /// Number of keys currently tracked, including expired ones not yet checked.
    pub fn len(&self) -> usize {
        self.open_until.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.open_until.lock().clear();
    }
}
