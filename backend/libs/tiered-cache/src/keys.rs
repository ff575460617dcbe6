//! Snapshot-versioned cache key schema
//!
//! All keys are built through [`Namespace`] so that entries written for one
//! catalog snapshot are never visible to another.
//! Key format: v{SCHEMA}:snap{version}:{params}:{entity}:{identifier}

use std::fmt::Display;

/// Cache schema version - increment when changing key formats or value layouts
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Key namespace for one catalog snapshot and one set of derivation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
    snapshot_version: u64,
}

impl Namespace {
    /// `params_tag` must change whenever the cached values would be computed
    /// differently (e.g. a different decay half-life).
    pub fn new(snapshot_version: u64, params_tag: &str) -> Self {
        Self {
            prefix: format!(
                "v{}:snap{}:{}:",
                CACHE_SCHEMA_VERSION, snapshot_version, params_tag
            ),
            snapshot_version,
        }
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    /// Prefix shared by every key in this namespace
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Format: v1:snap{version}:{params}:{entity}:{id}
    pub fn key(&self, entity: &str, id: impl Display) -> String {
        format!("{}{}:{}", self.prefix, entity, id)
    }

    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

/// Key inspection helpers
pub struct CacheKey;

impl CacheKey {
    /// Extract the snapshot version a key was written for
    pub fn snapshot_version(key: &str) -> Option<u64> {
        key.split(':').nth(1)?.strip_prefix("snap")?.parse().ok()
    }

    /// Extract entity type from key
    pub fn entity_type(key: &str) -> Option<&str> {
        // Format: v{N}:snap{V}:{params}:{entity}:...
        let parts: Vec<&str> = key.split(':').collect();
        if parts.len() >= 5 {
            Some(parts[3])
        } else {
            None
        }
    }
}
