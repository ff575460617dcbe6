//! Tiers 2 and 3: string-valued stores shared beyond one worker
//!
//! Values cross these tiers as serialized [`crate::CacheEntry`] envelopes so a
//! value read back from any tier is bit-identical to the one written.

use crate::{CacheResult, Tier};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[async_trait]
pub trait RemoteTier: Send + Sync {
    fn tier(&self) -> Tier;

    /// Batch lookup; the result is aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Batch write (last write wins)
    async fn set_many(&self, items: &[(String, String)]) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut values = self.get_many(&[key.to_string()]).await?;
        Ok(values.pop().flatten())
    }

    async fn set(&self, key: &str, value: String) -> CacheResult<()> {
        self.set_many(&[(key.to_string(), value)]).await
    }
}

/// In-process shared tier backed by a concurrent map
///
/// Bounded: when full, expired entries are swept and, failing that, the write
/// is dropped. Dropping a write only costs a later recomputation.
pub struct SharedMemoryTier {
    entries: DashMap<String, (String, Instant)>,
    capacity: usize,
    ttl: Duration,
}

impl SharedMemoryTier {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_expired(&self) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, inserted_at)| inserted_at.elapsed() < ttl);
        debug!(
            removed = before.saturating_sub(self.entries.len()),
            "Shared tier sweep"
        );
    }
}

#[async_trait]
impl RemoteTier for SharedMemoryTier {
    fn tier(&self) -> Tier {
        Tier::Shared
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        Ok(keys
            .iter()
            .map(|key| {
                self.entries.get(key).and_then(|entry| {
                    let (value, inserted_at) = entry.value();
                    (inserted_at.elapsed() < self.ttl).then(|| value.clone())
                })
            })
            .collect())
    }

    async fn set_many(&self, items: &[(String, String)]) -> CacheResult<()> {
        if self.entries.len() + items.len() > self.capacity {
            self.sweep_expired();
        }
        for (key, value) in items {
            if self.entries.len() >= self.capacity && !self.entries.contains_key(key) {
                continue;
            }
            self.entries
                .insert(key.clone(), (value.clone(), Instant::now()));
        }
        Ok(())
    }
}
