// Utility functions for match-engine

use chrono::{DateTime, Utc};
use std::f32::consts::LN_2;

/// Exponential decay for time-based scoring; exactly 0.5 after one half-life
pub fn exponential_decay(age_hours: f32, half_life_hours: f32) -> f32 {
    (-age_hours / half_life_hours * LN_2).exp()
}

/// Age of `posted_at` relative to `as_of`; postings from the future count as fresh
pub fn age_hours(posted_at: DateTime<Utc>, as_of: DateTime<Utc>) -> f32 {
    let seconds = (as_of - posted_at).num_seconds().max(0);
    seconds as f32 / 3600.0
}

/// Clamp into [0, 1]; NaN maps to 0
pub fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
