//! Redis-based cache implementation
//!
//! This module implements caching using Redis as the backend.
//! It's suitable for distributed caching in multi-instance deployments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::config::RedisCacheConfig;
use crate::error::CacheError;

use super::traits::{CacheStats, CacheStore};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 100;

/// Redis-backed cache
///
/// All keys are namespaced as `{prefix}:{key}`.
pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl RedisCache {
    /// Connects to Redis
    pub async fn connect(config: &RedisCacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            prefix: config.prefix.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        })
    }

    /// Returns the key prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn make_key(&self, key: &str) -> String {
        prefixed_key(&self.prefix, key)
    }
}

/// Generates a namespaced key
fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

/// Redis rejects a zero expiry
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.make_key(key)).await?;

        match value {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(Bytes::from(data)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.make_key(key), data.as_ref(), ttl_seconds(ttl))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(self.make_key(key)).await?;
        self.invalidations.fetch_add(removed, Ordering::Relaxed);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let full_pattern = self.make_key(pattern);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        // SCAN instead of KEYS so large keyspaces don't block the server
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %full_pattern, removed, "Deleted cache keys by pattern");
        self.invalidations.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: 0,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
