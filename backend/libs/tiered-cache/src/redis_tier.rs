//! Redis-backed shared tier (cross-process)

use crate::{CacheError, CacheResult, RemoteTier, Tier};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Pipeline;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

/// Upper bound on a single Redis round trip before the tier counts as unavailable
const OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

pub struct RedisTier {
    redis: SharedRedis,
    ttl: Duration,
}

impl RedisTier {
    pub fn new(redis: SharedRedis, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    pub async fn connect(url: &str, ttl: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = with_timeout(ConnectionManager::new(client)).await?;
        info!(ttl_secs = ttl.as_secs(), "Redis cache tier connected");
        Ok(Self::new(Arc::new(Mutex::new(manager)), ttl))
    }

    /// Add jitter to TTL to prevent thundering herd
    fn add_jitter(ttl_secs: u64) -> u64 {
        let jitter_percent = (rand::random::<u32>() % 10) as f64 / 100.0;
        let jitter = (ttl_secs as f64 * jitter_percent).round() as u64;
        ttl_secs + jitter
    }
}

async fn with_timeout<T, F>(future: F) -> CacheResult<T>
where
    F: Future<Output = Result<T, redis::RedisError>>,
{
    match tokio::time::timeout(OPERATION_TIMEOUT, future).await {
        Ok(result) => result.map_err(CacheError::Redis),
        Err(_) => Err(CacheError::Unavailable(format!(
            "redis operation exceeded {:?}",
            OPERATION_TIMEOUT
        ))),
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    fn tier(&self) -> Tier {
        Tier::Shared
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.lock().await;
        let values: Vec<Option<String>> =
            with_timeout(redis::cmd("MGET").arg(keys).query_async(&mut *conn)).await?;
        debug!(count = keys.len(), "Redis tier MGET");
        Ok(values)
    }

    async fn set_many(&self, items: &[(String, String)]) -> CacheResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut pipe = Pipeline::new();
        for (key, value) in items {
            pipe.set_ex(key, value, Self::add_jitter(self.ttl.as_secs().max(1)))
                .ignore();
        }
        let mut conn = self.redis.lock().await;
        with_timeout(pipe.query_async::<_, ()>(&mut *conn)).await?;
        debug!(count = items.len(), "Redis tier pipeline set");
        Ok(())
    }
}
