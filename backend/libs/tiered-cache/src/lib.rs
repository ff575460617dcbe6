//! Multi-tier cache for values derived from an immutable catalog snapshot
//!
//! - Tier 1 ([`LocalTier`]): in-process LRU owned by one worker
//! - Tier 2 ([`SharedMemoryTier`] or [`RedisTier`]): shared across workers
//! - Tier 3 ([`FileTier`]): persistent across restarts
//!
//! Keys are namespaced by snapshot version ([`Namespace`]), so a new snapshot
//! only ever produces misses. Every tier failure degrades to the next tier or
//! to a miss; the cache never returns an error to its caller.

mod entry;
mod error;
mod file_tier;
mod keys;
mod local;
mod metrics;
mod redis_tier;
mod remote;

pub use entry::{CacheEntry, Tier};
pub use error::{CacheError, CacheResult};
pub use file_tier::FileTier;
pub use keys::{CacheKey, Namespace, CACHE_SCHEMA_VERSION};
pub use local::LocalTier;
pub use metrics::{CacheMetrics, CacheStats, CacheStatsSnapshot};
pub use redis_tier::{RedisTier, SharedRedis};
pub use remote::{RemoteTier, SharedMemoryTier};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tier 2/3 handles plus statistics; cheap to clone and share across workers
pub struct TieredCache<V> {
    shared: Option<Arc<dyn RemoteTier>>,
    persistent: Option<Arc<dyn RemoteTier>>,
    stats: Arc<CacheStats>,
    metrics: Option<CacheMetrics>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            persistent: self.persistent.clone(),
            stats: Arc::clone(&self.stats),
            metrics: self.metrics.clone(),
            _value: PhantomData,
        }
    }
}

impl<V> Default for TieredCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TieredCache<V> {
    /// Local tier only; add shared/persistent tiers with the `with_*` builders
    pub fn new() -> Self {
        Self {
            shared: None,
            persistent: None,
            stats: Arc::new(CacheStats::new()),
            metrics: None,
            _value: PhantomData,
        }
    }

    pub fn with_shared(mut self, tier: Arc<dyn RemoteTier>) -> Self {
        self.shared = Some(tier);
        self
    }

    pub fn with_persistent(mut self, tier: Arc<dyn RemoteTier>) -> Self {
        self.persistent = Some(tier);
        self
    }

    pub fn with_metrics(mut self, metrics: CacheMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn has_tier(&self, tier: Tier) -> bool {
        match tier {
            Tier::Local => true,
            Tier::Shared => self.shared.is_some(),
            Tier::Persistent => self.persistent.is_some(),
        }
    }

    /// Remote tiers ordered fastest first
    fn remote_tiers(&self) -> impl Iterator<Item = &Arc<dyn RemoteTier>> {
        self.shared.iter().chain(self.persistent.iter())
    }

    fn record_unavailable(&self, tier: Tier, operation: &str, error: &CacheError) {
        warn!(tier = %tier, operation, error = %error, "Cache tier unavailable, degrading");
        self.stats.record_unavailable();
        if let Some(metrics) = &self.metrics {
            metrics.record_error(tier, operation);
        }
    }
}

impl<V> TieredCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn get(&self, local: &mut LocalTier<V>, key: &str) -> Option<Arc<V>> {
        self.get_many(local, &[key.to_string()])
            .await
            .pop()
            .flatten()
    }

    /// Look `keys` up tier by tier; hits in slower tiers are promoted into the
    /// faster ones. The result is aligned with `keys`.
    pub async fn get_many(&self, local: &mut LocalTier<V>, keys: &[String]) -> Vec<Option<Arc<V>>> {
        let now = Utc::now();
        let mut found: Vec<Option<Arc<V>>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<usize> = Vec::new();

        for (idx, key) in keys.iter().enumerate() {
            let hit = local.get_at(key, now);
            if hit.is_some() {
                self.record_hit(Tier::Local);
            } else {
                missing.push(idx);
            }
            found.push(hit);
        }

        // Raw envelopes found in a slower tier, to be copied into faster ones
        let mut promoted: Vec<(String, String)> = Vec::new();

        for remote in self.remote_tiers() {
            if missing.is_empty() {
                break;
            }
            let tier = remote.tier();
            let lookup: Vec<String> = missing.iter().map(|&idx| keys[idx].clone()).collect();

            let values = match remote.get_many(&lookup).await {
                Ok(values) if values.len() == lookup.len() => values,
                Ok(values) => {
                    let e = CacheError::InvalidData(format!(
                        "{} values for {} keys",
                        values.len(),
                        lookup.len()
                    ));
                    self.record_unavailable(tier, "get", &e);
                    continue;
                }
                Err(e) => {
                    self.record_unavailable(tier, "get", &e);
                    continue;
                }
            };

            let mut still_missing = Vec::with_capacity(missing.len());
            for (idx, raw) in missing.into_iter().zip(values) {
                let decoded =
                    raw.and_then(|raw| self.decode(&keys[idx], &raw).map(|value| (value, raw)));
                match decoded {
                    Some((value, raw)) => {
                        self.record_hit(tier);
                        let value = Arc::new(value);
                        local.put(keys[idx].clone(), Arc::clone(&value));
                        if tier == Tier::Persistent {
                            promoted.push((keys[idx].clone(), raw));
                        }
                        found[idx] = Some(value);
                    }
                    None => still_missing.push(idx),
                }
            }
            missing = still_missing;
        }

        if !promoted.is_empty() {
            if let Some(shared) = &self.shared {
                if let Err(e) = shared.set_many(&promoted).await {
                    self.record_unavailable(Tier::Shared, "promote", &e);
                }
            }
        }

        if !missing.is_empty() {
            self.stats.record_misses(missing.len() as u64);
            if let Some(metrics) = &self.metrics {
                let entity = CacheKey::entity_type(&keys[missing[0]]).unwrap_or("unknown");
                metrics.record_misses(entity, missing.len() as u64);
            }
            debug!(misses = missing.len(), lookups = keys.len(), "Cache misses");
        }

        found
    }

    pub async fn put(&self, local: &mut LocalTier<V>, key: String, value: V, tier: Tier) {
        self.put_many(local, vec![(key, value)], tier).await;
    }

    /// Store values in `tier` and every faster tier. Tiers that are not
    /// configured are skipped; tier failures are logged and counted only.
    pub async fn put_many(
        &self,
        local: &mut LocalTier<V>,
        items: Vec<(String, V)>,
        tier: Tier,
    ) -> Vec<Arc<V>> {
        let mut encoded: Vec<(String, String)> = Vec::new();
        let mut stored = Vec::with_capacity(items.len());

        for (key, value) in items {
            if tier > Tier::Local {
                let entry = CacheEntry::new(key.as_str(), &value, tier);
                match serde_json::to_string(&entry) {
                    Ok(raw) => encoded.push((key.clone(), raw)),
                    Err(e) => warn!(key = %key, error = %e, "Cache serialization failed"),
                }
            }
            let value = Arc::new(value);
            local.put(key, Arc::clone(&value));
            stored.push(value);
        }
        self.record_writes(Tier::Local, stored.len() as u64);

        for remote in self.remote_tiers() {
            let remote_tier = remote.tier();
            if remote_tier > tier || encoded.is_empty() {
                continue;
            }
            match remote.set_many(&encoded).await {
                Ok(()) => self.record_writes(remote_tier, encoded.len() as u64),
                Err(e) => self.record_unavailable(remote_tier, "set", &e),
            }
        }

        stored
    }

    fn decode(&self, key: &str, raw: &str) -> Option<V> {
        match serde_json::from_str::<CacheEntry<V>>(raw) {
            Ok(entry) if entry.key == key => Some(entry.value),
            Ok(entry) => {
                debug!(key = %key, stored_key = %entry.key, "Cache entry key mismatch");
                self.stats.record_stale();
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache deserialization failed");
                self.stats.record_stale();
                None
            }
        }
    }

    fn record_hit(&self, tier: Tier) {
        self.stats.record_hit(tier);
        if let Some(metrics) = &self.metrics {
            metrics.record_hit(tier);
        }
    }

    fn record_writes(&self, tier: Tier, count: u64) {
        self.stats.record_writes(count);
        if let Some(metrics) = &self.metrics {
            metrics.record_writes(tier, count);
        }
    }
}
