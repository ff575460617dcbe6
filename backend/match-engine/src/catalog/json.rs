use super::{CatalogProvider, CatalogSnapshot, LocationTable};
use crate::error::Result;
use crate::models::{Job, LocationCode, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationDistance {
    pub a: LocationCode,
    pub b: LocationCode,
    pub distance_km: f32,
}

/// On-disk catalog export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: u64,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub locations: Vec<LocationDistance>,
}

impl CatalogDocument {
    pub fn location_table(&self) -> LocationTable {
        let mut table = LocationTable::new();
        for entry in &self.locations {
            table.insert(entry.a, entry.b, entry.distance_km);
        }
        table
    }
}

/// Reads one JSON document holding jobs, users and location distances
pub struct JsonCatalogProvider {
    path: PathBuf,
}

impl JsonCatalogProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<CatalogDocument> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl CatalogProvider for JsonCatalogProvider {
    async fn load_snapshot(&self) -> Result<CatalogSnapshot> {
        let doc = self.read().await?;
        let table = doc.location_table();
        info!(
            path = %self.path.display(),
            version = doc.version,
            jobs = doc.jobs.len(),
            location_pairs = table.len(),
            "Loaded catalog snapshot"
        );
        CatalogSnapshot::new(doc.version, doc.as_of, doc.jobs, table)
    }

    async fn load_users(&self) -> Result<Vec<User>> {
        let mut users = self.read().await?.users;
        for user in &mut users {
            user.normalize();
        }
        info!(path = %self.path.display(), users = users.len(), "Loaded users");
        Ok(users)
    }
}
