//! Persistent tier: one JSON file per key
//!
//! File names are the SHA-256 of the key so arbitrary keys map to safe paths.
//! Writes go to a temporary file and are renamed into place, which keeps
//! concurrent writers of the same (deterministic) value safe.

use crate::{CacheError, CacheResult, RemoteTier, Tier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct StoredValue {
    key: String,
    value: String,
    written_at_secs: u64,
}

pub struct FileTier {
    dir: PathBuf,
    ttl: Duration,
}

impl FileTier {
    /// Creates `dir` if it does not exist
    pub async fn open(dir: impl AsRef<Path>, ttl: Duration) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Persistent cache tier opened");
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    async fn read_one(&self, key: &str) -> CacheResult<Option<String>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let stored: StoredValue = match serde_json::from_slice(&bytes) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupted persistent cache file, removing");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        // Hash collision or foreign file
        if stored.key != key {
            return Ok(None);
        }

        if stored.written_at_secs.saturating_add(self.ttl.as_secs()) <= Self::now_secs() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        Ok(Some(stored.value))
    }

    async fn write_one(&self, key: &str, value: &str) -> CacheResult<()> {
        let stored = StoredValue {
            key: key.to_string(),
            value: value.to_string(),
            written_at_secs: Self::now_secs(),
        };
        let data = serde_json::to_vec(&stored)?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp{}", rand::random::<u32>()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTier for FileTier {
    fn tier(&self) -> Tier {
        Tier::Persistent
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.read_one(key).await?);
        }
        Ok(values)
    }

    async fn set_many(&self, items: &[(String, String)]) -> CacheResult<()> {
        for (key, value) in items {
            self.write_one(key, value).await?;
        }
        debug!(count = items.len(), "Persistent tier write");
        Ok(())
    }
}
