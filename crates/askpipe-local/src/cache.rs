//! Time-bounded in-memory query cache, one instance per backend.
//!
//! Entries expire lazily: every read and every write purges anything older
//! than the TTL first; there is no background sweeper. On overflow the
//! oldest-inserted entry is evicted (insertion order, deliberately not LRU).

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Fixed entry lifetime shared by every backend cache.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct QueryCache<T> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<Vec<(String, CacheEntry<T>)>>,
}

impl<T: Clone> QueryCache<T> {
    pub fn new(max_entries: usize) -> Self {
        Self::with_ttl(CACHE_TTL, max_entries)
    }

    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, CacheEntry<T>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn purge(entries: &mut Vec<(String, CacheEntry<T>)>, ttl: Duration, now: Instant) {
        entries.retain(|(_, e)| now.duration_since(e.stored_at) <= ttl);
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    /// `get` against an explicit clock, for deterministic tests.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        let mut entries = self.lock();
        Self::purge(&mut entries, self.ttl, now);
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, e)| e.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.insert_at(key, value, Instant::now());
    }

    /// `insert` against an explicit clock, for deterministic tests.
    pub fn insert_at(&self, key: impl Into<String>, value: T, now: Instant) {
        let key = key.into();
        let mut entries = self.lock();
        Self::purge(&mut entries, self.ttl, now);
        entries.retain(|(k, _)| k != &key);
        entries.push((key, CacheEntry { value, stored_at: now }));
        if entries.len() > self.max_entries {
            entries.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_within_ttl_returns_the_stored_value() {
        let cache: QueryCache<String> = QueryCache::new(5);
        let t0 = Instant::now();
        cache.insert_at("q", "answer".to_string(), t0);
        assert_eq!(
            cache.get_at("q", t0 + Duration::from_secs(60)),
            Some("answer".to_string())
        );
    }

    #[test]
    fn get_after_ttl_returns_absent() {
        let cache: QueryCache<String> = QueryCache::new(5);
        let t0 = Instant::now();
        cache.insert_at("q", "answer".to_string(), t0);
        assert_eq!(cache.get_at("q", t0 + CACHE_TTL + Duration::from_secs(1)), None);
        // The expired entry was purged, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn writes_purge_expired_entries_first() {
        let cache: QueryCache<u32> = QueryCache::new(5);
        let t0 = Instant::now();
        cache.insert_at("old", 1, t0);
        cache.insert_at("new", 2, t0 + CACHE_TTL + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("new", t0 + CACHE_TTL + Duration::from_secs(2)), Some(2));
    }

    #[test]
    fn sixth_insert_evicts_exactly_the_oldest_entry() {
        let cache: QueryCache<u32> = QueryCache::new(5);
        let t0 = Instant::now();
        for (i, key) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            cache.insert_at(*key, i as u32, t0 + Duration::from_secs(i as u64));
        }
        cache.insert_at("f", 5, t0 + Duration::from_secs(5));
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(6)), None);
        assert_eq!(cache.get_at("b", t0 + Duration::from_secs(6)), Some(1));
        assert_eq!(cache.get_at("f", t0 + Duration::from_secs(6)), Some(5));
    }

    #[test]
    fn reinserting_a_key_replaces_its_value_without_growing() {
        let cache: QueryCache<u32> = QueryCache::new(5);
        let t0 = Instant::now();
        cache.insert_at("q", 1, t0);
        cache.insert_at("q", 2, t0 + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("q", t0 + Duration::from_secs(2)), Some(2));
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let cache: QueryCache<u32> = QueryCache::new(5);
        let t0 = Instant::now();
        cache.insert_at("rust-1-short", 1, t0);
        cache.insert_at("rust-1-detailed", 2, t0);
        assert_eq!(cache.get_at("rust-1-short", t0), Some(1));
        assert_eq!(cache.get_at("rust-1-detailed", t0), Some(2));
    }
}
