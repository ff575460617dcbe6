use super::{CatalogProvider, CatalogSnapshot, LocationTable};
use crate::error::Result;
use crate::models::{Job, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct SyntheticParams {
    pub seed: u64,
    pub version: u64,
    pub as_of: DateTime<Utc>,
    pub jobs: usize,
    pub users: usize,
    pub locations: u32,
    pub categories: u32,
    pub features: u32,
    /// Share of records with each optional field missing
    pub missing_rate: f64,
}

impl SyntheticParams {
    pub fn new(jobs: usize, users: usize) -> Self {
        Self {
            seed: 42,
            version: 1,
            as_of: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            jobs,
            users,
            locations: 40,
            categories: 30,
            features: 200,
            missing_rate: 0.05,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Seeded generator; the same params always produce the same data
#[derive(Debug, Clone)]
pub struct SyntheticCatalog {
    params: SyntheticParams,
}

impl SyntheticCatalog {
    pub fn new(params: SyntheticParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SyntheticParams {
        &self.params
    }

    pub fn snapshot(&self) -> Result<CatalogSnapshot> {
        let p = &self.params;
        let mut rng = StdRng::seed_from_u64(p.seed);

        let mut table = LocationTable::new();
        for a in 0..p.locations {
            for b in (a + 1)..p.locations {
                // Leave a few pairs unknown
                if rng.gen_bool(0.9) {
                    table.insert(a, b, rng.gen_range(5.0..600.0));
                }
            }
        }

        let jobs = (0..p.jobs as u64)
            .map(|id| {
                let mut job = Job::new(id + 1);
                if !rng.gen_bool(p.missing_rate) {
                    job.location = Some(rng.gen_range(0..p.locations.max(1)));
                }
                if !rng.gen_bool(p.missing_rate) {
                    let min: f64 = rng.gen_range(30_000.0..120_000.0);
                    job = job.with_salary(min, min * rng.gen_range(1.0..1.6));
                }
                if !rng.gen_bool(p.missing_rate) {
                    let count = rng.gen_range(1..=3);
                    job = job.with_categories(codes(&mut rng, count, p.categories));
                }
                if !rng.gen_bool(p.missing_rate) {
                    let count = rng.gen_range(2..=8);
                    job = job.with_features(codes(&mut rng, count, p.features));
                }
                if !rng.gen_bool(p.missing_rate) {
                    let minutes = rng.gen_range(0..60 * 24 * 60);
                    job = job.posted_at(p.as_of - Duration::minutes(minutes));
                }
                job
            })
            .collect();

        CatalogSnapshot::new(p.version, p.as_of, jobs, table)
    }

    pub fn users(&self) -> Vec<User> {
        let p = &self.params;
        // Separate stream so user generation does not shift with job count
        let mut rng = StdRng::seed_from_u64(p.seed ^ 0x5eed_u64.rotate_left(32));

        (0..p.users as u64)
            .map(|id| {
                let mut user = User::new(id + 1);
                if !rng.gen_bool(p.missing_rate) {
                    user = user.with_location(
                        rng.gen_range(0..p.locations.max(1)),
                        rng.gen_range(10.0..150.0),
                    );
                }
                if !rng.gen_bool(p.missing_rate) {
                    user = user.with_salary_expectation(rng.gen_range(40_000.0..140_000.0));
                }
                let count = rng.gen_range(1..=4);
                user = user.with_categories(codes(&mut rng, count, p.categories));
                let count = rng.gen_range(1..=5);
                user.with_features(codes(&mut rng, count, p.features))
            })
            .collect()
    }
}

fn codes(rng: &mut StdRng, count: usize, range: u32) -> Vec<u32> {
    (0..count).map(|_| rng.gen_range(0..range.max(1))).collect()
}

#[async_trait]
impl CatalogProvider for SyntheticCatalog {
    async fn load_snapshot(&self) -> Result<CatalogSnapshot> {
        self.snapshot()
    }

    async fn load_users(&self) -> Result<Vec<User>> {
        Ok(self.users())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = SyntheticCatalog::new(SyntheticParams::new(200, 20));
        let b = SyntheticCatalog::new(SyntheticParams::new(200, 20));
        assert_eq!(a.snapshot().unwrap().jobs(), b.snapshot().unwrap().jobs());
        assert_eq!(a.users(), b.users());

        let c = SyntheticCatalog::new(SyntheticParams::new(200, 20).seed(7));
        assert_ne!(a.snapshot().unwrap().jobs(), c.snapshot().unwrap().jobs());
    }

    #[test]
    fn test_sizes_and_validity() {
        let catalog = SyntheticCatalog::new(SyntheticParams::new(500, 50));
        let snapshot = catalog.snapshot().unwrap();
        assert_eq!(snapshot.len(), 500);
        let users = catalog.users();
        assert_eq!(users.len(), 50);
        assert!(users.iter().all(|u| u.validate().is_ok()));
    }
}
