//! Explicit TTL cache abstraction.
//!
//! Injected into the components that need short-lived memoization (the
//! retrieval engine's document reverse-lookups) instead of living in a
//! package-level static. Entries expire after a fixed TTL; expired entries
//! are evicted lazily on access.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A mutex-guarded map with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get a live entry, evicting it if its TTL has elapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key, (value, Instant::now()));
    }

    /// Drop one entry, e.g. after the underlying record changed.
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Number of entries, expired ones included (eviction is lazy).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 42);
        assert_eq!(cache.get(&"k"), Some(42));
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("k", 42);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1i64, "doc".to_string());
        cache.invalidate(&1);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn test_insert_refreshes_expiry() {
        let cache = TtlCache::new(Duration::from_millis(50));
        cache.insert("k", 1);
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("k", 2);
        std::thread::sleep(Duration::from_millis(30));

        // The second insert restarted the clock.
        assert_eq!(cache.get(&"k"), Some(2));
    }
}
