// ============================================
// Pre-filter (候选预过滤)
// ============================================
//
// Cheap rejection tests in increasing cost order:
// 1. location compatibility (table lookup per location code)
// 2. salary expectation gap
// 3. feature bloom signature (definite negatives only)
//
// Missing data never rejects. An empty result falls back to the most recent
// catalog items so every user gets a non-empty list.

mod bloom;

pub use bloom::FeatureBloom;

use crate::catalog::CatalogSnapshot;
use crate::config::PrefilterConfig;
use crate::models::User;
use crate::services::cache::{CatalogCache, JobDerived};
use serde::Serialize;
use std::sync::Arc;
use tiered_cache::LocalTier;
use tracing::{debug, info};

/// A job that survived filtering, with its catalog-derived components
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Index into the snapshot's job list
    pub idx: usize,
    pub derived: Arc<JobDerived>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefilterStats {
    pub total: usize,
    pub after_location: usize,
    pub after_salary: usize,
    pub after_feature: usize,
    pub fallback_used: bool,
}

#[derive(Debug, Clone)]
pub struct PrefilterOutput {
    pub candidates: Vec<Candidate>,
    pub stats: PrefilterStats,
}

#[derive(Debug, Clone)]
pub struct Prefilter {
    min_location_compat: f32,
    salary_gap_multiplier: f64,
    fallback_size: usize,
}

impl Prefilter {
    pub fn new(config: &PrefilterConfig) -> Self {
        Self {
            min_location_compat: config.min_location_compat,
            salary_gap_multiplier: config.salary_gap_multiplier,
            fallback_size: config.fallback_size,
        }
    }

    /// Run all stages for one user. Never fails; the worst case is the
    /// recency fallback.
    pub async fn filter(
        &self,
        user: &User,
        snapshot: &CatalogSnapshot,
        cache: &CatalogCache,
        local: &mut LocalTier<JobDerived>,
    ) -> PrefilterOutput {
        let mut stats = PrefilterStats {
            total: snapshot.len(),
            ..Default::default()
        };

        let located = self.location_stage(user, snapshot);
        stats.after_location = located.len();

        let affordable = self.salary_stage(user, snapshot, located);
        stats.after_salary = affordable.len();

        let mut candidates = fetch(snapshot, cache, local, affordable).await;
        candidates = feature_stage(user, candidates);
        stats.after_feature = candidates.len();

        if candidates.is_empty() && !snapshot.is_empty() {
            let recent = snapshot.most_recent(self.fallback_size).to_vec();
            info!(
                user_id = user.id,
                fallback_size = recent.len(),
                "Pre-filter removed every candidate, using most recent jobs"
            );
            candidates = fetch(snapshot, cache, local, recent).await;
            stats.fallback_used = true;
        }

        debug!(
            user_id = user.id,
            total = stats.total,
            after_location = stats.after_location,
            after_salary = stats.after_salary,
            after_feature = stats.after_feature,
            "Pre-filter complete"
        );

        PrefilterOutput { candidates, stats }
    }

    /// Every catalog job as a candidate, bypassing the rejection tests
    pub async fn unfiltered(
        snapshot: &CatalogSnapshot,
        cache: &CatalogCache,
        local: &mut LocalTier<JobDerived>,
    ) -> Vec<Candidate> {
        fetch(snapshot, cache, local, (0..snapshot.len()).collect()).await
    }

    /// Stage 1: one compatibility lookup per location code. Unlocated jobs,
    /// unlocated users and unknown pairs pass.
    pub fn location_stage(&self, user: &User, snapshot: &CatalogSnapshot) -> Vec<usize> {
        let Some(user_location) = user.location else {
            return (0..snapshot.len()).collect();
        };
        let table = snapshot.locations();

        let mut passed: Vec<usize> = snapshot.unlocated().to_vec();
        for (code, jobs) in snapshot.by_location() {
            let compatible = table
                .compatibility(user_location, code, user.radius_km)
                .map_or(true, |compat| compat >= self.min_location_compat);
            if compatible {
                passed.extend_from_slice(jobs);
            }
        }
        passed.sort_unstable();
        passed
    }

    /// Stage 2: reject when the expectation exceeds the offered maximum by more
    /// than the configured multiplier
    pub fn salary_stage(
        &self,
        user: &User,
        snapshot: &CatalogSnapshot,
        mut jobs: Vec<usize>,
    ) -> Vec<usize> {
        let Some(expectation) = user.salary_expectation else {
            return jobs;
        };
        jobs.retain(|&idx| match snapshot.job(idx).salary {
            Some(range) => expectation <= range.max * self.salary_gap_multiplier,
            None => true,
        });
        jobs
    }
}

/// Stage 3: reject only when the bloom proves none of the preferred features
/// is present
pub fn feature_stage(user: &User, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    if user.preferred_features.is_empty() {
        return candidates;
    }
    candidates.retain(|candidate| {
        candidate.derived.bloom.is_empty()
            || candidate
                .derived
                .bloom
                .may_contain_any(&user.preferred_features)
    });
    candidates
}

async fn fetch(
    snapshot: &CatalogSnapshot,
    cache: &CatalogCache,
    local: &mut LocalTier<JobDerived>,
    indexes: Vec<usize>,
) -> Vec<Candidate> {
    let jobs: Vec<_> = indexes.iter().map(|&idx| snapshot.job(idx)).collect();
    let derived = cache.derived_for(local, &jobs).await;
    indexes
        .into_iter()
        .zip(derived)
        .map(|(idx, derived)| Candidate { idx, derived })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LocationTable;
    use crate::config::test_config;
    use crate::services::cache::DerivationParams;
    use crate::models::Job;
    use chrono::{Duration, Utc};
    use tiered_cache::TieredCache;

    fn setup(jobs: Vec<Job>) -> (CatalogSnapshot, CatalogCache, Prefilter) {
        let config = test_config();
        let mut table = LocationTable::new();
        table.insert(1, 2, 20.0);
        table.insert(1, 3, 500.0);
        let as_of = Utc::now();
        let snapshot = CatalogSnapshot::new(1, as_of, jobs, table).unwrap();
        let cache = CatalogCache::from_parts(
            TieredCache::new(),
            &config.cache,
            1,
            as_of,
            DerivationParams::from_config(&config),
        );
        (snapshot, cache, Prefilter::new(&config.prefilter))
    }

    fn ids(snapshot: &CatalogSnapshot, output: &PrefilterOutput) -> Vec<u64> {
        output
            .candidates
            .iter()
            .map(|c| snapshot.job(c.idx).id)
            .collect()
    }

    #[tokio::test]
    async fn test_location_stage() {
        let (snapshot, cache, prefilter) = setup(vec![
            Job::new(1).with_location(1),
            Job::new(2).with_location(2),
            Job::new(3).with_location(3),
            Job::new(4).with_location(4),
            Job::new(5),
        ]);
        let user = User::new(1).with_location(1, 10.0);
        let mut local = cache.new_local_tier();
        let output = prefilter.filter(&user, &snapshot, &cache, &mut local).await;

        // 3 is 500km away (compat 0.02); 4 is unknown and passes; 5 has no location
        assert_eq!(ids(&snapshot, &output), vec![1, 2, 4, 5]);
        assert_eq!(output.stats.after_location, 4);
    }

    #[tokio::test]
    async fn test_salary_stage() {
        let (snapshot, cache, prefilter) = setup(vec![
            Job::new(1).with_salary(10.0, 100.0),
            Job::new(2).with_salary(10.0, 50.0),
            Job::new(3),
        ]);
        // multiplier 1.5: 100 * 1.5 = 150 >= 120 passes, 50 * 1.5 = 75 < 120 rejects
        let user = User::new(1).with_salary_expectation(120.0);
        let mut local = cache.new_local_tier();
        let output = prefilter.filter(&user, &snapshot, &cache, &mut local).await;
        assert_eq!(ids(&snapshot, &output), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_feature_stage_rejects_definite_negatives_only() {
        let (snapshot, cache, prefilter) = setup(vec![
            Job::new(1).with_features(vec![5, 6]),
            Job::new(2).with_features(vec![7]),
            Job::new(3),
        ]);
        let user = User::new(1).with_features(vec![6, 100]);
        let mut local = cache.new_local_tier();
        let output = prefilter.filter(&user, &snapshot, &cache, &mut local).await;

        let kept = ids(&snapshot, &output);
        assert!(kept.contains(&1));
        assert!(kept.contains(&3));
    }

    #[tokio::test]
    async fn test_empty_result_falls_back_to_recent() {
        let as_of = Utc::now();
        let (snapshot, cache, prefilter) = setup(vec![
            Job::new(1).with_salary(1.0, 2.0).posted_at(as_of - Duration::hours(3)),
            Job::new(2).with_salary(1.0, 2.0).posted_at(as_of - Duration::hours(1)),
            Job::new(3).with_salary(1.0, 2.0),
        ]);
        let user = User::new(1).with_salary_expectation(1_000.0);
        let mut local = cache.new_local_tier();
        let output = prefilter.filter(&user, &snapshot, &cache, &mut local).await;

        assert!(output.stats.fallback_used);
        assert_eq!(output.stats.after_salary, 0);
        assert_eq!(ids(&snapshot, &output), vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_user_without_data_keeps_everything() {
        let (snapshot, cache, prefilter) = setup(vec![
            Job::new(1).with_location(3).with_salary(1.0, 2.0),
            Job::new(2).with_features(vec![1]),
        ]);
        let user = User::new(1);
        let mut local = cache.new_local_tier();
        let output = prefilter.filter(&user, &snapshot, &cache, &mut local).await;
        assert_eq!(output.candidates.len(), 2);
        assert!(!output.stats.fallback_used);
    }
}
