use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache tier, ordered fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process LRU owned by one worker
    Local,
    /// Shared across workers (in-process map or Redis)
    Shared,
    /// Survives restarts
    Persistent,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Shared => "shared",
            Tier::Persistent => "persistent",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored envelope, identical in every tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub tier: Tier,
    pub inserted_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, tier: Tier) -> Self {
        Self {
            key: key.into(),
            value,
            tier,
            inserted_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.inserted_at + ttl <= now,
            // TTL too large to represent: never expires
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order() {
        assert!(Tier::Local < Tier::Shared);
        assert!(Tier::Shared < Tier::Persistent);
    }

    #[test]
    fn test_expiry() {
        let mut entry = CacheEntry::new("k", 1u32, Tier::Local);
        let now = Utc::now();
        assert!(!entry.is_expired(Duration::from_secs(60), now));

        entry.inserted_at = now - chrono::Duration::seconds(120);
        assert!(entry.is_expired(Duration::from_secs(60), now));
    }
}
