//! Immutable catalog snapshot
//!
//! Built once per run and shared read-only by every worker. Construction
//! normalizes code sets and precomputes the indexes the pre-filter walks.

mod json;
mod synthetic;

pub use json::{CatalogDocument, JsonCatalogProvider, LocationDistance};
pub use synthetic::{SyntheticCatalog, SyntheticParams};

use crate::error::{EngineError, Result};
use crate::models::{Job, LocationCode, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Source of the run's catalog snapshot and user population
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn load_snapshot(&self) -> Result<CatalogSnapshot>;
    async fn load_users(&self) -> Result<Vec<User>>;
}

/// Precomputed distances between location codes (symmetric)
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    distances: HashMap<(LocationCode, LocationCode), f32>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: LocationCode, b: LocationCode, distance_km: f32) {
        self.distances.insert(Self::pair(a, b), distance_km);
    }

    pub fn distance(&self, a: LocationCode, b: LocationCode) -> Option<f32> {
        if a == b {
            return Some(0.0);
        }
        self.distances.get(&Self::pair(a, b)).copied()
    }

    /// Compatibility of a job location for a user within `radius_km`;
    /// `None` when the pair is not in the table
    pub fn compatibility(
        &self,
        user_location: LocationCode,
        job_location: LocationCode,
        radius_km: f32,
    ) -> Option<f32> {
        if user_location == job_location {
            return Some(1.0);
        }
        let distance = self.distance(user_location, job_location)?;
        if distance <= radius_km {
            Some(1.0)
        } else {
            Some((radius_km / distance).clamp(0.0, 1.0))
        }
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    fn pair(a: LocationCode, b: LocationCode) -> (LocationCode, LocationCode) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    version: u64,
    as_of: DateTime<Utc>,
    /// Sorted by ascending job id
    jobs: Vec<Job>,
    locations: LocationTable,
    by_location: BTreeMap<LocationCode, Vec<usize>>,
    unlocated: Vec<usize>,
    /// Job indexes by posting time descending, undated last, ties by id
    recent: Vec<usize>,
}

impl CatalogSnapshot {
    pub fn new(
        version: u64,
        as_of: DateTime<Utc>,
        mut jobs: Vec<Job>,
        locations: LocationTable,
    ) -> Result<Self> {
        jobs.sort_by_key(|job| job.id);
        if let Some(pair) = jobs.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(EngineError::Catalog(format!(
                "duplicate job id {} in snapshot {}",
                pair[0].id, version
            )));
        }

        let mut by_location: BTreeMap<LocationCode, Vec<usize>> = BTreeMap::new();
        let mut unlocated = Vec::new();
        for (idx, job) in jobs.iter_mut().enumerate() {
            job.normalize();
            match job.location {
                Some(code) => by_location.entry(code).or_default().push(idx),
                None => unlocated.push(idx),
            }
        }

        let mut recent: Vec<usize> = (0..jobs.len()).collect();
        // Option<DateTime> orders None first, so reverse the timestamps only
        recent.sort_by(|&a, &b| {
            let (ja, jb) = (&jobs[a], &jobs[b]);
            match (ja.posted_at, jb.posted_at) {
                (Some(ta), Some(tb)) => tb.cmp(&ta),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(ja.id.cmp(&jb.id))
        });

        Ok(Self {
            version,
            as_of,
            jobs,
            locations,
            by_location,
            unlocated,
            recent,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Reference time for freshness; never the wall clock
    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, idx: usize) -> &Job {
        &self.jobs[idx]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    /// Job indexes grouped by location code
    pub fn by_location(&self) -> impl Iterator<Item = (LocationCode, &[usize])> {
        self.by_location
            .iter()
            .map(|(code, jobs)| (*code, jobs.as_slice()))
    }

    /// Jobs without a location code
    pub fn unlocated(&self) -> &[usize] {
        &self.unlocated
    }

    /// Indexes of the `n` most recently posted jobs
    pub fn most_recent(&self, n: usize) -> &[usize] {
        &self.recent[..n.min(self.recent.len())]
    }
}
