//! Run configuration
//!
//! Every field is explicit. The only default is the pre-filter fallback size.
//! `validate` runs once before any batch is dispatched; a failure is fatal.

use crate::error::{EngineError, Result};
use crate::models::{Component, ComponentScores};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tiered_cache::Tier;

/// Default number of most recent catalog items used when filtering leaves nothing
pub const DEFAULT_FALLBACK_SIZE: usize = 50;

/// Allowed distance of the weight sum from 1.0
const WEIGHT_SUM_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub prefilter: PrefilterConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub io: IoConfig,
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weights: ComponentScores,
    pub freshness_half_life_hours: f32,
}

#[derive(Debug, Clone)]
pub struct PrefilterConfig {
    /// Location compatibility below this rejects a job
    pub min_location_compat: f32,
    /// Reject when the expectation exceeds `salary.max * multiplier`
    pub salary_gap_multiplier: f64,
    pub bloom_bits: usize,
    pub bloom_hashes: u32,
    pub fallback_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SharedTierConfig {
    Disabled,
    InProcess { capacity: usize },
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub local_capacity: usize,
    pub local_ttl: Duration,
    pub shared: SharedTierConfig,
    pub shared_ttl: Duration,
    /// `None` disables the persistent tier
    pub persistent_dir: Option<PathBuf>,
    pub persistent_ttl: Duration,
    /// Slowest tier freshly computed values are written to
    pub write_tier: Tier,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    pub k: usize,
    pub batch_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub run_deadline: Option<Duration>,
    pub memory_high_water_bytes: u64,
    pub result_channel_capacity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IoConfig {
    pub catalog_path: Option<PathBuf>,
    /// `None` writes results to stdout
    pub results_path: Option<PathBuf>,
}

/// Flat view of the `MATCH_*` environment variables
#[derive(Debug, Deserialize)]
struct RawConfig {
    weight_base: f32,
    weight_category: f32,
    weight_salary: f32,
    weight_feature: f32,
    weight_freshness: f32,
    weight_location: f32,
    freshness_half_life_hours: f32,

    prefilter_min_location_compat: f32,
    prefilter_salary_gap_multiplier: f64,
    bloom_bits: usize,
    bloom_hashes: u32,
    #[serde(default = "default_fallback_size")]
    fallback_size: usize,

    cache_local_capacity: usize,
    cache_local_ttl_secs: u64,
    /// off | memory | redis
    cache_shared: String,
    cache_shared_capacity: Option<usize>,
    cache_redis_url: Option<String>,
    cache_shared_ttl_secs: u64,
    cache_dir: Option<PathBuf>,
    cache_persistent_ttl_secs: u64,
    /// local | shared | persistent
    cache_write_tier: String,

    worker_count: usize,
    batch_size: usize,
    k: usize,
    batch_timeout_secs: u64,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    run_deadline_secs: Option<u64>,
    memory_high_water_mb: u64,
    result_channel_capacity: usize,

    catalog_path: Option<PathBuf>,
    results_path: Option<PathBuf>,
}

fn default_fallback_size() -> usize {
    DEFAULT_FALLBACK_SIZE
}

fn parse_tier(value: &str) -> Result<Tier> {
    match value.to_ascii_lowercase().as_str() {
        "local" => Ok(Tier::Local),
        "shared" => Ok(Tier::Shared),
        "persistent" => Ok(Tier::Persistent),
        other => Err(EngineError::ConfigInvalid(format!(
            "MATCH_CACHE_WRITE_TIER must be local, shared or persistent, got {:?}",
            other
        ))),
    }
}

impl RawConfig {
    fn into_config(self) -> Result<EngineConfig> {
        let shared = match self.cache_shared.to_ascii_lowercase().as_str() {
            "off" => SharedTierConfig::Disabled,
            "memory" => SharedTierConfig::InProcess {
                capacity: self.cache_shared_capacity.ok_or_else(|| {
                    EngineError::ConfigInvalid(
                        "MATCH_CACHE_SHARED_CAPACITY is required when MATCH_CACHE_SHARED=memory"
                            .to_string(),
                    )
                })?,
            },
            "redis" => SharedTierConfig::Redis {
                url: self.cache_redis_url.ok_or_else(|| {
                    EngineError::ConfigInvalid(
                        "MATCH_CACHE_REDIS_URL is required when MATCH_CACHE_SHARED=redis"
                            .to_string(),
                    )
                })?,
            },
            other => {
                return Err(EngineError::ConfigInvalid(format!(
                    "MATCH_CACHE_SHARED must be off, memory or redis, got {:?}",
                    other
                )))
            }
        };

        Ok(EngineConfig {
            scoring: ScoringConfig {
                weights: ComponentScores {
                    base: self.weight_base,
                    category: self.weight_category,
                    salary: self.weight_salary,
                    feature: self.weight_feature,
                    freshness: self.weight_freshness,
                    location: self.weight_location,
                },
                freshness_half_life_hours: self.freshness_half_life_hours,
            },
            prefilter: PrefilterConfig {
                min_location_compat: self.prefilter_min_location_compat,
                salary_gap_multiplier: self.prefilter_salary_gap_multiplier,
                bloom_bits: self.bloom_bits,
                bloom_hashes: self.bloom_hashes,
                fallback_size: self.fallback_size,
            },
            cache: CacheConfig {
                local_capacity: self.cache_local_capacity,
                local_ttl: Duration::from_secs(self.cache_local_ttl_secs),
                shared,
                shared_ttl: Duration::from_secs(self.cache_shared_ttl_secs),
                persistent_dir: self.cache_dir,
                persistent_ttl: Duration::from_secs(self.cache_persistent_ttl_secs),
                write_tier: parse_tier(&self.cache_write_tier)?,
            },
            scheduler: SchedulerConfig {
                worker_count: self.worker_count,
                batch_size: self.batch_size,
                k: self.k,
                batch_timeout: Duration::from_secs(self.batch_timeout_secs),
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
                backoff_multiplier: self.backoff_multiplier,
                run_deadline: self.run_deadline_secs.map(Duration::from_secs),
                memory_high_water_bytes: self.memory_high_water_mb.saturating_mul(1024 * 1024),
                result_channel_capacity: self.result_channel_capacity,
            },
            io: IoConfig {
                catalog_path: self.catalog_path,
                results_path: self.results_path,
            },
        })
    }
}

impl EngineConfig {
    /// Load from `MATCH_*` environment variables (and `.env`), then validate
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let raw: RawConfig = envy::prefixed("MATCH_").from_env()?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every violation so one failed start reports all of them
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<String> = Vec::new();

        let weights = &self.scoring.weights;
        for component in Component::ALL {
            let weight = weights.get(component);
            if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                problems.push(format!(
                    "weight {} must be within [0, 1], got {}",
                    component.as_str(),
                    weight
                ));
            }
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            problems.push(format!("weights must sum to 1.0, got {}", sum));
        }
        if !(self.scoring.freshness_half_life_hours > 0.0) {
            problems.push("freshness_half_life_hours must be > 0".to_string());
        }

        let prefilter = &self.prefilter;
        if !(0.0..=1.0).contains(&prefilter.min_location_compat) {
            problems.push("prefilter min_location_compat must be within [0, 1]".to_string());
        }
        if !(prefilter.salary_gap_multiplier >= 1.0) {
            problems.push("prefilter salary_gap_multiplier must be >= 1.0".to_string());
        }
        if prefilter.bloom_bits == 0 || prefilter.bloom_bits % 64 != 0 {
            problems.push("bloom_bits must be a non-zero multiple of 64".to_string());
        }
        if !(1..=16).contains(&prefilter.bloom_hashes) {
            problems.push("bloom_hashes must be within 1..=16".to_string());
        }
        if prefilter.fallback_size == 0 {
            problems.push("fallback_size must be >= 1".to_string());
        }

        let cache = &self.cache;
        if cache.local_capacity == 0 {
            problems.push("cache local_capacity must be >= 1".to_string());
        }
        if let SharedTierConfig::InProcess { capacity: 0 } = cache.shared {
            problems.push("cache shared capacity must be >= 1".to_string());
        }
        let write_tier_enabled = match cache.write_tier {
            Tier::Local => true,
            Tier::Shared => cache.shared != SharedTierConfig::Disabled,
            Tier::Persistent => cache.persistent_dir.is_some(),
        };
        if !write_tier_enabled {
            problems.push(format!(
                "cache write tier {} is not enabled",
                cache.write_tier
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.worker_count == 0 {
            problems.push("worker_count must be >= 1".to_string());
        }
        if scheduler.batch_size == 0 {
            problems.push("batch_size must be >= 1".to_string());
        }
        if scheduler.k == 0 {
            problems.push("k must be >= 1".to_string());
        }
        if scheduler.batch_timeout.is_zero() {
            problems.push("batch_timeout must be > 0".to_string());
        }
        if scheduler.max_attempts == 0 {
            problems.push("max_attempts must be >= 1".to_string());
        }
        if !(scheduler.backoff_multiplier >= 1.0) {
            problems.push("backoff_multiplier must be >= 1.0".to_string());
        }
        if scheduler.max_backoff < scheduler.initial_backoff {
            problems.push("max_backoff must be >= initial_backoff".to_string());
        }
        if matches!(scheduler.run_deadline, Some(d) if d.is_zero()) {
            problems.push("run_deadline must be > 0 when set".to_string());
        }
        if scheduler.memory_high_water_bytes == 0 {
            problems.push("memory_high_water must be > 0".to_string());
        }
        if scheduler.result_channel_capacity == 0 {
            problems.push("result_channel_capacity must be >= 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ConfigInvalid(problems.join("; ")))
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        scoring: ScoringConfig {
            weights: ComponentScores {
                base: 0.3,
                category: 0.0,
                salary: 0.2,
                feature: 0.2,
                freshness: 0.1,
                location: 0.2,
            },
            freshness_half_life_hours: 24.0,
        },
        prefilter: PrefilterConfig {
            min_location_compat: 0.3,
            salary_gap_multiplier: 1.5,
            bloom_bits: 256,
            bloom_hashes: 3,
            fallback_size: DEFAULT_FALLBACK_SIZE,
        },
        cache: CacheConfig {
            local_capacity: 10_000,
            local_ttl: Duration::from_secs(3600),
            shared: SharedTierConfig::InProcess { capacity: 100_000 },
            shared_ttl: Duration::from_secs(3600),
            persistent_dir: None,
            persistent_ttl: Duration::from_secs(86_400),
            write_tier: Tier::Shared,
        },
        scheduler: SchedulerConfig {
            worker_count: 2,
            batch_size: 4,
            k: 3,
            batch_timeout: Duration::from_secs(60),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            run_deadline: None,
            memory_high_water_bytes: u64::MAX,
            result_channel_capacity: 16,
        },
        io: IoConfig::default(),
    }
}
