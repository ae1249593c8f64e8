//! A process-local, pool-partitioned, TTL cache backed by Redis, grounded
//! on `providers/cache.rs`'s `deadpool_redis::Pool` setup but generalized
//! from a single shared pool to six named pools, each with its own
//! `{ ttl_seconds, max_entries, max_result_size_bytes }`, isolated with a
//! `pool:` key prefix rather than separate Redis keyspaces (simpler to
//! operate, same isolation guarantee since invalidation is always scoped
//! to one pool).

use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePool {
    Pods,
    Streams,
    SingleRecords,
    RecordLists,
    RecordCounts,
    Permissions,
}

impl CachePool {
    fn prefix(self) -> &'static str {
        match self {
            CachePool::Pods => "pods",
            CachePool::Streams => "streams",
            CachePool::SingleRecords => "singleRecords",
            CachePool::RecordLists => "recordLists",
            CachePool::RecordCounts => "recordCounts",
            CachePool::Permissions => "permissions",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub ttl_seconds: u64,
    pub max_entries: u64,
    pub max_result_size_bytes: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        PoolLimits { ttl_seconds: 60, max_entries: 10_000, max_result_size_bytes: 256 * 1024 }
    }
}

#[derive(Clone)]
pub struct Cache {
    pool: Pool,
    limits: HashMap<&'static str, PoolLimits>,
}

pub fn setup_cache(redis_url: &str) -> Result<Pool, anyhow::Error> {
    let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
    Ok(pool)
}

impl Cache {
    pub fn new(pool: Pool) -> Self {
        let mut limits = HashMap::new();
        limits.insert(CachePool::Pods.prefix(), PoolLimits { ttl_seconds: 300, ..Default::default() });
        limits.insert(CachePool::Streams.prefix(), PoolLimits { ttl_seconds: 120, ..Default::default() });
        limits.insert(
            CachePool::SingleRecords.prefix(),
            PoolLimits { ttl_seconds: 60, max_result_size_bytes: 1024 * 1024, ..Default::default() },
        );
        limits.insert(
            CachePool::RecordLists.prefix(),
            PoolLimits { ttl_seconds: 30, max_result_size_bytes: 2 * 1024 * 1024, ..Default::default() },
        );
        limits.insert(CachePool::RecordCounts.prefix(), PoolLimits { ttl_seconds: 30, ..Default::default() });
        limits.insert(CachePool::Permissions.prefix(), PoolLimits { ttl_seconds: 30, ..Default::default() });
        Cache { pool, limits }
    }

    fn key(pool: CachePool, key: &str) -> String {
        format!("{}:{}", pool.prefix(), key)
    }

    pub async fn get<T: DeserializeOwned>(&self, pool: CachePool, key: &str) -> Option<T> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("cache unavailable, treating as miss: {}", err);
                return None;
            }
        };
        let raw: Option<String> = conn.get(Self::key(pool, key)).await.unwrap_or_else(|err| {
            tracing::warn!("cache get failed, treating as miss: {}", err);
            None
        });
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set<T: Serialize>(&self, pool: CachePool, key: &str, value: &T, ttl: Option<u64>) {
        let limits = self.limits.get(pool.prefix()).copied().unwrap_or_default();
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!("cache set skipped, serialization failed: {}", err);
                return;
            }
        };
        if serialized.len() > limits.max_result_size_bytes {
            tracing::debug!(
                pool = pool.prefix(),
                size = serialized.len(),
                "cache set skipped: exceeds max_result_size_bytes"
            );
            return;
        }
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("cache unavailable, skipping set: {}", err);
                return;
            }
        };
        let ttl = ttl.unwrap_or(limits.ttl_seconds);
        let _: Result<(), _> = conn.set_ex(Self::key(pool, key), serialized, ttl).await;
    }

    /// Prefix-based bulk removal.
    pub async fn invalidate(&self, pool: CachePool, key_prefix: &str) {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!("cache unavailable, skipping invalidate: {}", err);
                return;
            }
        };
        let pattern = format!("{}*", Self::key(pool, key_prefix));
        let keys: Vec<String> = conn.keys(&pattern).await.unwrap_or_default();
        if keys.is_empty() {
            return;
        }
        let _: Result<(), _> = conn.del(keys).await;
    }

    /// Test-only: wipes every pool.
    pub async fn clear_all(&self) {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let keys: Vec<String> = conn.keys("*").await.unwrap_or_default();
        if !keys.is_empty() {
            let _: Result<(), _> = conn.del(keys).await;
        }
    }

    /// Invalidation contract for a successful append to `stream_path` in `pod`.
    pub async fn invalidate_for_append(&self, pod: &str, stream_path: &str) {
        let scoped = format!("{}/{}", pod, stream_path.trim_start_matches('/'));
        self.invalidate(CachePool::SingleRecords, &format!("{}/", scoped)).await;
        self.invalidate(CachePool::RecordLists, &scoped).await;
        self.invalidate(CachePool::RecordCounts, &scoped).await;
        self.invalidate(CachePool::Streams, pod).await;
    }

    /// Invalidation contract for stream creation/destruction.
    pub async fn invalidate_for_stream_change(&self, pod: &str) {
        self.invalidate(CachePool::Streams, pod).await;
    }

    /// Invalidation contract for writes to `.config/owner|routing|domains`.
    pub async fn invalidate_for_pod_config_change(&self, pod: &str) {
        self.invalidate(CachePool::Pods, pod).await;
    }
}
