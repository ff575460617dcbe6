//! Per-component scoring rules
//!
//! Each rule returns a value in [0, 1] and a confidence. Missing inputs give the
//! neutral value with lowered confidence instead of an error.

use crate::catalog::LocationTable;
use crate::models::{FeatureCode, Job, User};
use crate::utils::{age_hours, exponential_decay, unit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NEUTRAL_VALUE: f32 = 0.5;
pub const INCOMPLETE_CONFIDENCE: f32 = 0.6;
pub const COMPLETE_CONFIDENCE: f32 = 1.0;

/// Compatibility assumed for location pairs missing from the table
pub const UNKNOWN_LOCATION_COMPAT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Subscore {
    pub value: f32,
    pub confidence: f32,
}

impl Subscore {
    pub fn complete(value: f32) -> Self {
        Self {
            value: unit(value),
            confidence: COMPLETE_CONFIDENCE,
        }
    }

    pub fn missing() -> Self {
        Self {
            value: NEUTRAL_VALUE,
            confidence: INCOMPLETE_CONFIDENCE,
        }
    }
}

/// Share of the job's optional fields that are present
pub fn base(job: &Job) -> Subscore {
    let present = [
        job.location.is_some(),
        job.salary.is_some(),
        !job.categories.is_empty(),
        !job.features.is_empty(),
        job.posted_at.is_some(),
    ];
    let count = present.iter().filter(|p| **p).count();
    Subscore::complete(count as f32 / present.len() as f32)
}

/// Jaccard overlap of preferred and offered categories
pub fn category(user: &User, job: &Job) -> Subscore {
    if user.preferred_categories.is_empty() || job.categories.is_empty() {
        return Subscore::missing();
    }
    let shared = intersection_count(&user.preferred_categories, &job.categories);
    let union = user.preferred_categories.len() + job.categories.len() - shared;
    Subscore::complete(shared as f32 / union as f32)
}

pub fn salary(user: &User, job: &Job) -> Subscore {
    let (Some(expectation), Some(range)) = (user.salary_expectation, job.salary) else {
        return Subscore::missing();
    };
    if expectation <= 0.0 {
        return Subscore::complete(1.0);
    }
    Subscore::complete((range.max / expectation).min(1.0) as f32)
}

/// Share of the user's preferred features the job carries
pub fn feature(user: &User, job: &Job) -> Subscore {
    if user.preferred_features.is_empty() || job.features.is_empty() {
        return Subscore::missing();
    }
    let shared = intersection_count(&user.preferred_features, &job.features);
    Subscore::complete(shared as f32 / user.preferred_features.len() as f32)
}

pub fn freshness(job: &Job, as_of: DateTime<Utc>, half_life_hours: f32) -> Subscore {
    match job.posted_at {
        Some(posted_at) => {
            Subscore::complete(exponential_decay(age_hours(posted_at, as_of), half_life_hours))
        }
        None => Subscore::missing(),
    }
}

pub fn location(table: &LocationTable, user: &User, job: &Job) -> Subscore {
    match (user.location, job.location) {
        (Some(user_location), Some(job_location)) => Subscore::complete(
            table
                .compatibility(user_location, job_location, user.radius_km)
                .unwrap_or(UNKNOWN_LOCATION_COMPAT),
        ),
        _ => Subscore::missing(),
    }
}

/// Both slices sorted and de-duplicated
pub fn intersection_count(a: &[FeatureCode], b: &[FeatureCode]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}
