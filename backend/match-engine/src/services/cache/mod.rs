// ============================================
// Catalog Cache (catalog-derived score components)
// ============================================
//
// Everything about a job that does not depend on the user is computed once
// per snapshot and shared through the tiered cache:
// - base (data completeness)
// - freshness (decay against the snapshot's as_of)
// - feature bloom signature (pre-filter stage 3)

use crate::config::{CacheConfig, EngineConfig, SharedTierConfig};
use crate::error::{EngineError, Result};
use crate::models::{Job, JobId};
use crate::services::prefilter::FeatureBloom;
use crate::services::scoring::components::{self, Subscore};
use chrono::{DateTime, Utc};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiered_cache::{
    CacheMetrics, CacheStats, FileTier, LocalTier, Namespace, RedisTier, SharedMemoryTier, Tier,
    TieredCache,
};
use tracing::{debug, info, warn};

const JOB_ENTITY: &str = "job";

/// Cached, catalog-only part of a job's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDerived {
    pub base: Subscore,
    pub freshness: Subscore,
    pub bloom: FeatureBloom,
}

/// Inputs that change how [`JobDerived`] is computed; part of the cache namespace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivationParams {
    pub half_life_hours: f32,
    pub bloom_bits: usize,
    pub bloom_hashes: u32,
}

impl DerivationParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            half_life_hours: config.scoring.freshness_half_life_hours,
            bloom_bits: config.prefilter.bloom_bits,
            bloom_hashes: config.prefilter.bloom_hashes,
        }
    }

    pub fn tag(&self) -> String {
        format!(
            "h{}b{}k{}",
            self.half_life_hours, self.bloom_bits, self.bloom_hashes
        )
    }
}

impl JobDerived {
    pub fn compute(job: &Job, as_of: DateTime<Utc>, params: &DerivationParams) -> Self {
        Self {
            base: components::base(job),
            freshness: components::freshness(job, as_of, params.half_life_hours),
            bloom: FeatureBloom::from_codes(&job.features, params.bloom_bits, params.bloom_hashes),
        }
    }
}

/// Resolves [`JobDerived`] values for one catalog snapshot
#[derive(Clone)]
pub struct CatalogCache {
    cache: TieredCache<JobDerived>,
    namespace: Namespace,
    params: DerivationParams,
    as_of: DateTime<Utc>,
    write_tier: Tier,
    local_capacity: usize,
    local_ttl: std::time::Duration,
    /// Configured tiers that could not be opened
    degraded: Vec<EngineError>,
}

impl CatalogCache {
    /// Connect the configured tiers. A tier that cannot be opened is logged
    /// and left out; the run continues on the remaining tiers.
    pub async fn build(
        config: &EngineConfig,
        snapshot_version: u64,
        as_of: DateTime<Utc>,
        registry: &Registry,
    ) -> Result<Self> {
        let cache_config = &config.cache;
        let mut cache = TieredCache::new();
        let mut degraded = Vec::new();

        match CacheMetrics::register(registry) {
            Ok(metrics) => cache = cache.with_metrics(metrics),
            Err(e) => warn!(error = %e, "Failed to register cache metrics"),
        }

        match &cache_config.shared {
            SharedTierConfig::Disabled => {}
            SharedTierConfig::InProcess { capacity } => {
                cache = cache.with_shared(Arc::new(SharedMemoryTier::new(
                    *capacity,
                    cache_config.shared_ttl,
                )));
            }
            SharedTierConfig::Redis { url } => {
                match RedisTier::connect(url, cache_config.shared_ttl).await {
                    Ok(tier) => cache = cache.with_shared(Arc::new(tier)),
                    Err(e) => {
                        let error = EngineError::CacheUnavailable(format!("{}: {e}", Tier::Shared));
                        warn!(error = %error, "Continuing without the shared tier");
                        degraded.push(error);
                    }
                }
            }
        }

        if let Some(dir) = &cache_config.persistent_dir {
            match FileTier::open(dir, cache_config.persistent_ttl).await {
                Ok(tier) => cache = cache.with_persistent(Arc::new(tier)),
                Err(e) => {
                    let error =
                        EngineError::CacheUnavailable(format!("{}: {e}", Tier::Persistent));
                    warn!(dir = %dir.display(), error = %error, "Continuing without the persistent tier");
                    degraded.push(error);
                }
            }
        }

        let params = DerivationParams::from_config(config);
        info!(
            snapshot_version,
            params = %params.tag(),
            shared = cache.has_tier(Tier::Shared),
            persistent = cache.has_tier(Tier::Persistent),
            write_tier = %cache_config.write_tier,
            degraded = degraded.len(),
            "Catalog cache ready"
        );

        let mut built = Self::from_parts(cache, cache_config, snapshot_version, as_of, params);
        built.degraded = degraded;
        Ok(built)
    }

    pub fn from_parts(
        cache: TieredCache<JobDerived>,
        config: &CacheConfig,
        snapshot_version: u64,
        as_of: DateTime<Utc>,
        params: DerivationParams,
    ) -> Self {
        Self {
            namespace: Namespace::new(snapshot_version, &params.tag()),
            cache,
            params,
            as_of,
            write_tier: config.write_tier,
            local_capacity: config.local_capacity,
            local_ttl: config.local_ttl,
            degraded: Vec::new(),
        }
    }

    /// Fresh Tier-1 cache for one worker slot
    pub fn new_local_tier(&self) -> LocalTier<JobDerived> {
        LocalTier::new(self.local_capacity, self.local_ttl)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn key(&self, job_id: JobId) -> String {
        self.namespace.key(JOB_ENTITY, job_id)
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        self.cache.stats()
    }

    pub fn params(&self) -> &DerivationParams {
        &self.params
    }

    pub fn has_tier(&self, tier: Tier) -> bool {
        self.cache.has_tier(tier)
    }

    /// One `CacheUnavailable` per configured tier that failed to open
    pub fn degraded(&self) -> &[EngineError] {
        &self.degraded
    }

    /// Derived values aligned with `jobs`: one batched lookup, misses computed
    /// and written back at the configured tier
    pub async fn derived_for(
        &self,
        local: &mut LocalTier<JobDerived>,
        jobs: &[&Job],
    ) -> Vec<Arc<JobDerived>> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> = jobs.iter().map(|job| self.key(job.id)).collect();
        let found = self.cache.get_many(local, &keys).await;

        let mut misses: Vec<usize> = Vec::new();
        let mut computed: Vec<(String, JobDerived)> = Vec::new();
        for (idx, hit) in found.iter().enumerate() {
            if hit.is_none() {
                misses.push(idx);
                computed.push((
                    keys[idx].clone(),
                    JobDerived::compute(jobs[idx], self.as_of, &self.params),
                ));
            }
        }

        if misses.is_empty() {
            return found.into_iter().flatten().collect();
        }

        debug!(misses = misses.len(), jobs = jobs.len(), "Computing derived job components");
        let stored = self.cache.put_many(local, computed, self.write_tier).await;

        let mut result = found;
        for (idx, value) in misses.into_iter().zip(stored) {
            result[idx] = Some(value);
        }
        result.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use chrono::Duration;

    fn catalog_cache(version: u64) -> CatalogCache {
        let config = test_config();
        let cache = TieredCache::new().with_shared(Arc::new(SharedMemoryTier::new(
            1_000,
            std::time::Duration::from_secs(60),
        )));
        CatalogCache::from_parts(
            cache,
            &config.cache,
            version,
            Utc::now(),
            DerivationParams::from_config(&config),
        )
    }

    #[test]
    fn test_params_tag_changes_namespace() {
        let config = test_config();
        let mut params = DerivationParams::from_config(&config);
        let a = Namespace::new(1, &params.tag());
        params.half_life_hours = 48.0;
        let b = Namespace::new(1, &params.tag());
        assert_ne!(a.prefix(), b.prefix());
    }

    #[tokio::test]
    async fn test_derived_for_computes_then_hits() {
        let cache = catalog_cache(1);
        let mut local = cache.new_local_tier();
        let jobs = vec![
            Job::new(1).with_features(vec![1, 2]),
            Job::new(2).posted_at(Utc::now() - Duration::hours(2)),
        ];
        let refs: Vec<&Job> = jobs.iter().collect();

        let first = cache.derived_for(&mut local, &refs).await;
        assert_eq!(first.len(), 2);
        assert_eq!(cache.stats().snapshot().misses, 2);

        let second = cache.derived_for(&mut local, &refs).await;
        assert_eq!(first, second);
        assert_eq!(cache.stats().snapshot().local_hits, 2);

        // A fresh worker finds the values in the shared tier
        let mut other = cache.new_local_tier();
        let third = cache.derived_for(&mut other, &refs).await;
        assert_eq!(first, third);
        assert_eq!(cache.stats().snapshot().shared_hits, 2);
    }

    #[tokio::test]
    async fn test_cached_equals_fresh() {
        let cache = catalog_cache(1);
        let mut local = cache.new_local_tier();
        let job = Job::new(9)
            .with_location(3)
            .with_features(vec![4, 8, 15])
            .posted_at(Utc::now() - Duration::minutes(77));

        let fresh = JobDerived::compute(&job, cache.as_of, cache.params());
        cache.derived_for(&mut local, &[&job]).await;

        let mut other = cache.new_local_tier();
        let from_shared = cache.derived_for(&mut other, &[&job]).await;
        assert_eq!(*from_shared[0], fresh);
    }

    #[tokio::test]
    async fn test_unopenable_tier_is_reported_and_skipped() {
        // A regular file where the cache directory should be
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = test_config();
        config.cache.persistent_dir = Some(file.path().join("cache"));

        let cache = CatalogCache::build(&config, 1, Utc::now(), &Registry::new())
            .await
            .unwrap();

        assert!(!cache.has_tier(Tier::Persistent));
        assert_eq!(cache.degraded().len(), 1);
        assert_eq!(
            cache.degraded()[0].kind(),
            crate::error::ErrorKind::CacheUnavailable
        );
        assert!(cache.degraded()[0].to_string().contains("persistent"));

        // Lookups still work on the remaining tiers
        let mut local = cache.new_local_tier();
        let job = Job::new(4).with_features(vec![2]);
        assert_eq!(cache.derived_for(&mut local, &[&job]).await.len(), 1);
    }
}
