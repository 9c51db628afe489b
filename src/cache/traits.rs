//! Cache store trait and related types
//!
//! This module defines the CacheStore trait that all cache implementations must implement,
//! as well as the associated types like CacheEntry, CacheMeta, and CacheStats.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;

/// A cached entry containing data and metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached data
    pub data: Bytes,
    /// Metadata about the cached entry
    pub meta: CacheMeta,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone)]
pub struct CacheMeta {
    /// Size of the cached data in bytes
    pub size: u64,
    /// Time-to-live duration
    pub ttl: Duration,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

impl CacheMeta {
    /// Creates a new CacheMeta stamped with the current time
    pub fn new(size: u64, ttl: Duration) -> Self {
        Self {
            size,
            ttl,
            created_at: Utc::now(),
        }
    }

    /// Checks if the cache entry has expired
    pub fn is_expired(&self) -> bool {
        let now = Utc::now();
        let expires_at = self.created_at + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        now > expires_at
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cached entries, when the backend can tell
    pub entries: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Entries removed by explicit or pattern deletes
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Trait for cache stores
///
/// The sync pipeline treats every implementation as best-effort: errors are
/// logged by callers and never fail a pass or a read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the name of this cache backend
    fn name(&self) -> &str;

    /// Retrieves a cached value by key
    ///
    /// Returns `Ok(None)` on a miss (absent or expired).
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores a value under `key` for `ttl`
    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Removes one key; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Removes every key matching a glob-style pattern such as `pokemon:*`
    ///
    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Current usage statistics
    async fn stats(&self) -> CacheStats;
}

/// Read and decode a JSON value; a miss is `Ok(None)`
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let data = serde_json::to_vec(value)?;
    cache.set(key, Bytes::from(data), ttl).await
}
