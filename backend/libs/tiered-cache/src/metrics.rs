//! Cache statistics and Prometheus metrics
//!
//! `CacheStats` are plain atomics owned by one cache instance and give the
//! per-run hit rate. `CacheMetrics` mirrors them into Prometheus counters on a
//! caller-supplied registry.

use crate::Tier;
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStats {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub unavailable: u64,
    pub stale: u64,
}

impl CacheStatsSnapshot {
    pub fn hits(&self) -> u64 {
        self.local_hits + self.shared_hits + self.persistent_hits
    }

    pub fn lookups(&self) -> u64 {
        self.hits() + self.misses
    }

    /// Fraction of lookups served by any tier; 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Local => &self.local_hits,
            Tier::Shared => &self.shared_hits,
            Tier::Persistent => &self.persistent_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_writes(&self, count: u64) {
        self.writes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }
}

/// Prometheus counters for one cache, labelled by tier
#[derive(Clone)]
pub struct CacheMetrics {
    hits: IntCounterVec,
    misses: IntCounterVec,
    writes: IntCounterVec,
    errors: IntCounterVec,
}

impl CacheMetrics {
    /// Create the counters and register them on `registry`
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.hits.clone()))?;
        registry.register(Box::new(metrics.misses.clone()))?;
        registry.register(Box::new(metrics.writes.clone()))?;
        registry.register(Box::new(metrics.errors.clone()))?;
        Ok(metrics)
    }

    /// Counters that are not exported anywhere (tests, embedded use)
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Ok(Self {
            hits: IntCounterVec::new(
                Opts::new("match_cache_hits_total", "Total cache hits"),
                &["tier"],
            )?,
            misses: IntCounterVec::new(
                Opts::new("match_cache_misses_total", "Total cache misses"),
                &["entity"],
            )?,
            writes: IntCounterVec::new(
                Opts::new("match_cache_writes_total", "Total cache writes"),
                &["tier"],
            )?,
            errors: IntCounterVec::new(
                Opts::new("match_cache_errors_total", "Total cache tier errors"),
                &["tier", "operation"],
            )?,
        })
    }

    pub fn record_hit(&self, tier: Tier) {
        self.hits.with_label_values(&[tier.as_str()]).inc();
    }

    pub fn record_misses(&self, entity: &str, count: u64) {
        self.misses.with_label_values(&[entity]).inc_by(count);
    }

    pub fn record_writes(&self, tier: Tier, count: u64) {
        self.writes.with_label_values(&[tier.as_str()]).inc_by(count);
    }

    pub fn record_error(&self, tier: Tier, operation: &str) {
        self.errors
            .with_label_values(&[tier.as_str(), operation])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit(Tier::Local);
        stats.record_hit(Tier::Shared);
        stats.record_hit(Tier::Persistent);
        stats.record_misses(1);

        let snap = stats.snapshot();
        assert_eq!(snap.hits(), 3);
        assert_eq!(snap.lookups(), 4);
        assert!((snap.hit_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_register_once_per_registry() {
        let registry = Registry::new();
        assert!(CacheMetrics::register(&registry).is_ok());
        // Same names on the same registry collide
        assert!(CacheMetrics::register(&registry).is_err());
        // A fresh registry is independent
        assert!(CacheMetrics::register(&Registry::new()).is_ok());
    }
}
