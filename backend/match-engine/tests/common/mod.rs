//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use match_engine::catalog::{CatalogSnapshot, LocationTable};
use match_engine::config::{
    CacheConfig, EngineConfig, IoConfig, PrefilterConfig, SchedulerConfig, ScoringConfig,
    SharedTierConfig, DEFAULT_FALLBACK_SIZE,
};
use match_engine::jobs::{ResultSink, SinkError};
use match_engine::models::{ComponentScores, Job, User, UserMatches};
use match_engine::services::cache::JobDerived;
use match_engine::services::scoring::StandardPolicy;
use match_engine::RunContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiered_cache::{SharedMemoryTier, Tier, TieredCache};

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    as_of() - ChronoDuration::hours(hours)
}

/// base .3, salary .2, feature .2, location .2, freshness .1, category 0
pub fn test_config() -> EngineConfig {
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
            min_location_compat: 0.2,
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
            k: 2,
            batch_timeout: Duration::from_secs(30),
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

pub fn shared_cache() -> TieredCache<JobDerived> {
    TieredCache::new().with_shared(Arc::new(SharedMemoryTier::new(
        100_000,
        Duration::from_secs(3600),
    )))
}

/// Context over an in-process shared tier with the standard policy
pub fn context(config: EngineConfig, snapshot: CatalogSnapshot) -> Arc<RunContext> {
    Arc::new(
        RunContext::with_cache(config, snapshot, shared_cache(), Arc::new(StandardPolicy))
            .expect("valid test context"),
    )
}

/// Locations 1, 2 and 3: 1-2 are 30 km apart, 3 is far from both
pub fn small_locations() -> LocationTable {
    let mut table = LocationTable::new();
    table.insert(1, 2, 30.0);
    table.insert(1, 3, 200.0);
    table.insert(2, 3, 180.0);
    table
}

/// Ten hand-written jobs with some fields missing on purpose
pub fn small_jobs() -> Vec<Job> {
    vec![
        Job::new(1)
            .with_location(1)
            .with_salary(50_000.0, 90_000.0)
            .with_categories(vec![1])
            .with_features(vec![1, 2, 3])
            .posted_at(hours_ago(0)),
        Job::new(2)
            .with_location(2)
            .with_salary(60_000.0, 100_000.0)
            .with_categories(vec![1])
            .with_features(vec![1, 2])
            .posted_at(hours_ago(24)),
        Job::new(3)
            .with_location(3)
            .with_salary(80_000.0, 120_000.0)
            .with_categories(vec![2])
            .with_features(vec![4, 5])
            .posted_at(hours_ago(48)),
        Job::new(4)
            .with_location(1)
            .with_salary(40_000.0, 60_000.0)
            .with_categories(vec![1])
            .with_features(vec![2, 3])
            .posted_at(hours_ago(12)),
        Job::new(5)
            .with_location(2)
            .with_categories(vec![1])
            .with_features(vec![1])
            .posted_at(hours_ago(6)),
        Job::new(6)
            .with_salary(70_000.0, 110_000.0)
            .with_categories(vec![1])
            .with_features(vec![1, 2, 3, 4])
            .posted_at(hours_ago(72)),
        Job::new(7)
            .with_location(3)
            .with_salary(100_000.0, 150_000.0)
            .with_categories(vec![3])
            .with_features(vec![5, 6])
            .posted_at(hours_ago(2)),
        Job::new(8)
            .with_location(1)
            .with_salary(30_000.0, 45_000.0)
            .with_categories(vec![1])
            .posted_at(hours_ago(96)),
        Job::new(9)
            .with_location(2)
            .with_salary(90_000.0, 130_000.0)
            .with_categories(vec![2])
            .with_features(vec![4, 6])
            .posted_at(hours_ago(1)),
        Job::new(10)
            .with_location(3)
            .with_salary(55_000.0, 75_000.0)
            .with_categories(vec![1])
            .with_features(vec![1, 3]),
    ]
}

pub fn small_users() -> Vec<User> {
    vec![
        User::new(1)
            .with_location(1, 50.0)
            .with_salary_expectation(80_000.0)
            .with_features(vec![1, 2, 3]),
        User::new(2)
            .with_location(3, 20.0)
            .with_salary_expectation(110_000.0)
            .with_features(vec![4, 5, 6]),
        User::new(3),
    ]
}

pub fn small_snapshot(version: u64) -> CatalogSnapshot {
    CatalogSnapshot::new(version, as_of(), small_jobs(), small_locations()).unwrap()
}

/// Every user gets `strong_per_user` jobs that match them on every component
/// and were posted in the last few hours; the rest of the catalog is old noise.
pub fn strong_and_noise(
    users: usize,
    strong_per_user: usize,
    noise: usize,
    seed: u64,
) -> (CatalogSnapshot, Vec<User>) {
    const LOCATIONS: u32 = 10;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut table = LocationTable::new();
    for a in 0..LOCATIONS {
        for b in (a + 1)..LOCATIONS {
            table.insert(a, b, rng.gen_range(5.0..500.0));
        }
    }

    let mut population = Vec::with_capacity(users);
    let mut jobs = Vec::new();
    let mut next_id = 1u64;

    for u in 0..users {
        let location = rng.gen_range(0..LOCATIONS);
        let expectation = rng.gen_range(40_000.0..120_000.0);
        let features: Vec<u32> = (0..4).map(|_| rng.gen_range(0..100)).collect();
        let user = User::new(u as u64 + 1)
            .with_location(location, rng.gen_range(10.0..80.0))
            .with_salary_expectation(expectation)
            .with_features(features.clone());

        for s in 0..strong_per_user {
            let mut offered = features.clone();
            offered.push(rng.gen_range(100..200));
            jobs.push(
                Job::new(next_id)
                    .with_location(location)
                    .with_salary(expectation * 0.8, expectation * 1.2)
                    .with_categories(vec![rng.gen_range(0..20)])
                    .with_features(offered)
                    .posted_at(hours_ago(s as i64 + 1)),
            );
            next_id += 1;
        }
        population.push(user);
    }

    for _ in 0..noise {
        let mut job = Job::new(next_id)
            .with_categories(vec![rng.gen_range(0..20)])
            .posted_at(hours_ago(rng.gen_range(200..2000)));
        if rng.gen_bool(0.9) {
            job = job.with_location(rng.gen_range(0..LOCATIONS));
        }
        if rng.gen_bool(0.9) {
            let min = rng.gen_range(20_000.0..150_000.0);
            job = job.with_salary(min, min * 1.3);
        }
        if rng.gen_bool(0.9) {
            let features: Vec<u32> = (0..rng.gen_range(1..8))
                .map(|_| rng.gen_range(0..200))
                .collect();
            job = job.with_features(features);
        }
        jobs.push(job);
        next_id += 1;
    }

    let snapshot = CatalogSnapshot::new(1, as_of(), jobs, table).unwrap();
    (snapshot, population)
}

/// Keeps every delivered result, keyed by user
#[derive(Default)]
pub struct CollectingSink {
    delivered: Mutex<Vec<UserMatches>>,
}

impl CollectingSink {
    pub fn results(&self) -> HashMap<u64, UserMatches> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|m| (m.user_id, m.clone()))
            .collect()
    }

    /// In delivery order
    pub fn all(&self) -> Vec<UserMatches> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn duplicate_users(&self) -> Vec<u64> {
        let mut seen = HashSet::new();
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !seen.insert(m.user_id))
            .map(|m| m.user_id)
            .collect()
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError> {
        self.delivered.lock().unwrap().push(matches);
        Ok(())
    }
}

/// Answers a range of delivery calls with `Unavailable`, forwards the rest
pub struct FlakySink {
    inner: CollectingSink,
    /// Delivery calls (0-based) answered with `Unavailable`
    failing: std::ops::Range<usize>,
    calls: AtomicUsize,
}

impl FlakySink {
    pub fn new(failures: usize) -> Self {
        Self::failing_calls(0..failures)
    }

    /// Only the `call`-th delivery (0-based) fails
    pub fn failing_call(call: usize) -> Self {
        Self::failing_calls(call..call + 1)
    }

    fn failing_calls(failing: std::ops::Range<usize>) -> Self {
        Self {
            inner: CollectingSink::default(),
            failing,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &CollectingSink {
        &self.inner
    }
}

#[async_trait]
impl ResultSink for FlakySink {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError> {
        if self.failing.contains(&self.calls.fetch_add(1, Ordering::SeqCst)) {
            return Err(SinkError::Unavailable("downstream restarting".to_string()));
        }
        self.inner.deliver(matches).await
    }
}

/// Rejects the listed users, accepts everyone else
pub struct RejectingSink {
    inner: CollectingSink,
    rejected: HashSet<u64>,
}

impl RejectingSink {
    pub fn new(rejected: impl IntoIterator<Item = u64>) -> Self {
        Self {
            inner: CollectingSink::default(),
            rejected: rejected.into_iter().collect(),
        }
    }

    pub fn inner(&self) -> &CollectingSink {
        &self.inner
    }
}

#[async_trait]
impl ResultSink for RejectingSink {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError> {
        if self.rejected.contains(&matches.user_id) {
            return Err(SinkError::Rejected(format!(
                "user {} is not accepted",
                matches.user_id
            )));
        }
        self.inner.deliver(matches).await
    }
}

pub fn job_ids(matches: &UserMatches) -> Vec<u64> {
    matches.matches.iter().map(|m| m.job_id).collect()
}
