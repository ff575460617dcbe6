//! Per-run context
//!
//! Everything a worker needs for one run, built once and shared behind an
//! `Arc`: configuration, catalog snapshot, cache, matcher, metrics and the
//! stop control.

use crate::catalog::CatalogSnapshot;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::jobs::RunControl;
use crate::metrics::EngineMetrics;
use crate::services::cache::{CatalogCache, DerivationParams, JobDerived};
use crate::services::scoring::{ScoringPolicy, StandardPolicy};
use crate::services::UserMatcher;
use chrono::{DateTime, Utc};
use prometheus::Registry;
use std::sync::Arc;
use tiered_cache::{CacheMetrics, TieredCache};
use tracing::info;
use uuid::Uuid;

pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub catalog: Arc<CatalogSnapshot>,
    pub cache: CatalogCache,
    pub matcher: UserMatcher,
    pub registry: Registry,
    pub metrics: EngineMetrics,
    pub control: RunControl,
}

fn metrics_error(e: prometheus::Error) -> EngineError {
    EngineError::ConfigInvalid(format!("metrics registration failed: {}", e))
}

impl RunContext {
    /// Validate `config`, connect the configured cache tiers and use the
    /// standard scoring policy
    pub async fn new(config: EngineConfig, catalog: CatalogSnapshot) -> Result<Self> {
        Self::with_policy(config, catalog, Arc::new(StandardPolicy)).await
    }

    pub async fn with_policy(
        config: EngineConfig,
        catalog: CatalogSnapshot,
        policy: Arc<dyn ScoringPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Registry::new();
        let cache =
            CatalogCache::build(&config, catalog.version(), catalog.as_of(), &registry).await?;
        Self::assemble(config, catalog, cache, registry, policy)
    }

    /// Use caller-supplied cache tiers instead of the configured ones
    pub fn with_cache(
        config: EngineConfig,
        catalog: CatalogSnapshot,
        cache: TieredCache<JobDerived>,
        policy: Arc<dyn ScoringPolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Registry::new();
        let cache = cache.with_metrics(CacheMetrics::register(&registry).map_err(metrics_error)?);
        let cache = CatalogCache::from_parts(
            cache,
            &config.cache,
            catalog.version(),
            catalog.as_of(),
            DerivationParams::from_config(&config),
        );
        Self::assemble(config, catalog, cache, registry, policy)
    }

    fn assemble(
        config: EngineConfig,
        catalog: CatalogSnapshot,
        cache: CatalogCache,
        registry: Registry,
        policy: Arc<dyn ScoringPolicy>,
    ) -> Result<Self> {
        let metrics = EngineMetrics::register(&registry).map_err(metrics_error)?;
        let matcher = UserMatcher::new(&config, policy);
        let run_id = Uuid::new_v4();

        info!(
            run_id = %run_id,
            snapshot_version = catalog.version(),
            jobs = catalog.len(),
            policy = matcher.scorer().policy().name(),
            "Run context ready"
        );

        Ok(Self {
            run_id,
            started_at: Utc::now(),
            config,
            catalog: Arc::new(catalog),
            cache,
            matcher,
            registry,
            metrics,
            control: RunControl::new(),
        })
    }
}
