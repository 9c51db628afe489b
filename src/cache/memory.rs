//! In-process cache implementation
//!
//! Used when no Redis URL is configured and in tests. Entries expire lazily
//! on read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::CacheError;

use super::traits::{CacheEntry, CacheMeta, CacheStats, CacheStore};

/// Internal state for tracking cache statistics
#[derive(Default)]
struct CacheState {
    storage: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

/// In-memory cache
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<RwLock<CacheState>>,
}

impl MemoryCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet read
    pub async fn len(&self) -> usize {
        self.state.read().await.storage.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut state = self.state.write().await;

        let entry_info = state
            .storage
            .get(key)
            .map(|e| (e.meta.is_expired(), e.data.clone()));

        match entry_info {
            Some((false, data)) => {
                state.hits += 1;
                Ok(Some(data))
            }
            Some((true, _)) => {
                state.storage.remove(key);
                state.misses += 1;
                Ok(None)
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let meta = CacheMeta::new(data.len() as u64, ttl);
        let mut state = self.state.write().await;
        state
            .storage
            .insert(key.to_string(), CacheEntry { data, meta });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if state.storage.remove(key).is_some() {
            state.invalidations += 1;
        }
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| CacheError::InvalidPattern(format!("{}: {}", pattern, e)))?;

        let mut state = self.state.write().await;
        let before = state.storage.len();
        state.storage.retain(|key, _| !matcher.matches(key));
        let removed = (before - state.storage.len()) as u64;
        state.invalidations += removed;

        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.storage.len() as u64,
            hits: state.hits,
            misses: state.misses,
            invalidations: state.invalidations,
        }
    }
}
