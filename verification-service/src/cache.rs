//! Eligibility result cache
//!
//! TTL-keyed cache consulted before any eligibility provider call. Redis
//! backs production deployments; the in-memory store covers tests and
//! single-node setups. Values are serialized JSON owned by the caller.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::VerificationConfig;
use crate::error::{VerificationError, VerificationResult};

/// Cache key for a record's eligibility result.
pub fn eligibility_cache_key(record_id: Uuid) -> String {
    format!("eligibility:{record_id}")
}

/// Builds the cache backend the configuration selects: Redis when
/// `redis_url` is set, the in-memory store otherwise.
pub async fn from_config(config: &VerificationConfig) -> VerificationResult<Arc<dyn CacheStore>> {
    match &config.redis_url {
        Some(url) => Ok(Arc::new(RedisCacheStore::new(url).await?)),
        None => Ok(Arc::new(InMemoryCacheStore::new())),
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> VerificationResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> VerificationResult<()>;
    async fn invalidate(&self, key: &str) -> VerificationResult<()>;
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Instant,
}

impl CachedValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory TTL cache. Expired entries are dropped lazily on read.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CachedValue>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> VerificationResult<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Entry exists but expired; drop it under the write lock.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> VerificationResult<()> {
        let entry = CachedValue {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> VerificationResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Redis-backed cache using SET EX for TTL expiry.
pub struct RedisCacheStore {
    redis: ConnectionManager,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore").finish_non_exhaustive()
    }
}

impl RedisCacheStore {
    pub async fn new(redis_url: &str) -> VerificationResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| VerificationError::Cache(format!("invalid Redis URL: {e}")))?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| VerificationError::Cache(format!("Redis connection failed: {e}")))?;
        Ok(Self { redis })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> VerificationResult<Option<String>> {
        let mut conn = self.redis.clone();
        conn.get(key)
            .await
            .map_err(|e| VerificationError::Cache(format!("Redis GET failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> VerificationResult<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| VerificationError::Cache(format!("Redis SET EX failed: {e}")))
    }

    async fn invalidate(&self, key: &str) -> VerificationResult<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| VerificationError::Cache(format!("Redis DEL failed: {e}")))
    }
}
