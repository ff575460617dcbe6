//! Tier 1: in-process LRU
//!
//! A `LocalTier` is owned by exactly one worker at a time, so it needs no
//! locking; it moves with the worker that owns it.

use crate::{CacheEntry, Namespace, Tier};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

pub struct LocalTier<V> {
    entries: LruCache<String, CacheEntry<Arc<V>>>,
    ttl: Duration,
}

impl<V> LocalTier<V> {
    /// A zero capacity is raised to one entry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Arc<V>> {
        self.get_at(key, Utc::now())
    }

    pub(crate) fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<Arc<V>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                return Some(Arc::clone(&entry.value))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
        }
        None
    }

    pub fn put(&mut self, key: String, value: Arc<V>) {
        let entry = CacheEntry::new(key.clone(), value, Tier::Local);
        self.entries.put(key, entry);
    }

    /// Drop every entry outside `live`; returns how many were removed
    pub fn evict_except(&mut self, live: &Namespace) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| !live.contains(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key.as_str());
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let mut tier = LocalTier::new(2, Duration::from_secs(60));
        tier.put("a".into(), Arc::new(1));
        tier.put("b".into(), Arc::new(2));
        // Touch "a" so "b" becomes least recently used
        assert_eq!(tier.get("a").as_deref(), Some(&1));
        tier.put("c".into(), Arc::new(3));

        assert!(tier.get("b").is_none());
        assert_eq!(tier.get("a").as_deref(), Some(&1));
        assert_eq!(tier.get("c").as_deref(), Some(&3));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let mut tier = LocalTier::new(4, Duration::from_secs(1));
        tier.put("a".into(), Arc::new(1));
        let later = Utc::now() + chrono::Duration::seconds(5);
        assert!(tier.get_at("a", later).is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_evict_except() {
        let old = Namespace::new(1, "p");
        let live = Namespace::new(2, "p");
        let mut tier = LocalTier::new(8, Duration::from_secs(60));
        tier.put(old.key("job", 1), Arc::new(1));
        tier.put(old.key("job", 2), Arc::new(2));
        tier.put(live.key("job", 1), Arc::new(3));

        assert_eq!(tier.evict_except(&live), 2);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.get(&live.key("job", 1)).as_deref(), Some(&3));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let tier: LocalTier<u32> = LocalTier::new(0, Duration::from_secs(1));
        assert_eq!(tier.capacity(), 1);
    }
}
