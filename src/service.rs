//! Core service surface consumed by the HTTP layer
//!
//! Manual sync triggers and the cache-aware list read path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{get_json, set_json, CacheStore};
use crate::database::PokemonStore;
use crate::error::{AppError, SyncError};
use crate::models::{Pokemon, SyncRunResult};
use crate::sync::{RefreshError, RefreshJob, SyncOrchestrator};

/// Cache key of the full pokemon list
pub const POKEMON_LIST_KEY: &str = "pokemon:list";

pub struct PokemonService {
    store: Arc<dyn PokemonStore>,
    cache: Arc<dyn CacheStore>,
    orchestrator: Arc<SyncOrchestrator>,
    refresh_job: Arc<RefreshJob>,
    list_ttl: Duration,
    shutdown: CancellationToken,
}

impl PokemonService {
    pub fn new(
        store: Arc<dyn PokemonStore>,
        cache: Arc<dyn CacheStore>,
        orchestrator: Arc<SyncOrchestrator>,
        refresh_job: Arc<RefreshJob>,
        list_ttl: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            cache,
            orchestrator,
            refresh_job,
            list_ttl,
            shutdown,
        }
    }

    /// Run one pass now, bypassing the schedule and the resilience layers
    pub async fn trigger_sync(&self) -> Result<SyncRunResult, SyncError> {
        self.orchestrator.run_pass(&self.shutdown).await
    }

    /// Run one pass now through the circuit breaker and retry executor
    pub async fn trigger_protected_sync(&self) -> Result<SyncRunResult, RefreshError> {
        self.refresh_job.run_protected().await
    }

    pub fn refresh_job(&self) -> &Arc<RefreshJob> {
        &self.refresh_job
    }

    /// All stored records and the total count
    ///
    /// Served from the cache when possible. Cache failures fall back to the
    /// store and are only logged.
    pub async fn list_records(&self) -> Result<(Vec<Pokemon>, u64), AppError> {
        match get_json::<Vec<Pokemon>>(self.cache.as_ref(), POKEMON_LIST_KEY).await {
            Ok(Some(records)) => {
                debug!(key = POKEMON_LIST_KEY, "Pokemon list cache hit");
                let total = self.store.count().await?;
                return Ok((records, total));
            }
            Ok(None) => debug!(key = POKEMON_LIST_KEY, "Pokemon list cache miss"),
            Err(e) => warn!(key = POKEMON_LIST_KEY, error = %e, "Failed to read pokemon list cache"),
        }

        let records = self.store.list_with_relations(0, 0).await?;
        let total = self.store.count().await?;

        if let Err(e) = set_json(self.cache.as_ref(), POKEMON_LIST_KEY, &records, self.list_ttl).await
        {
            warn!(key = POKEMON_LIST_KEY, error = %e, "Failed to populate pokemon list cache");
        }

        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::cache::MockCacheStore;
    use crate::config::{OverlapPolicy, SyncConfig};
    use crate::database::MockPokemonStore;
    use crate::error::CacheError;
    use crate::sync::{BreakerSettings, CircuitBreaker, MockPokemonSource, RetryManager};

    fn service_with(store: MockPokemonStore, cache: Arc<dyn CacheStore>) -> PokemonService {
        let store: Arc<dyn PokemonStore> = Arc::new(store);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(MockPokemonSource::new()),
            store.clone(),
            cache.clone(),
            &SyncConfig::default(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(BreakerSettings {
            name: "test".to_string(),
            failure_threshold: 3,
            max_half_open_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }));
        let job = Arc::new(RefreshJob::new(
            orchestrator.clone(),
            breaker,
            RetryManager::with_defaults(),
            OverlapPolicy::Skip,
            CancellationToken::new(),
        ));

        PokemonService::new(
            store,
            cache,
            orchestrator,
            job,
            Duration::from_secs(300),
            CancellationToken::new(),
        )
    }

    // Test 1: Miss loads from the store and populates the cache
    #[tokio::test]
    async fn test_list_records_miss_populates_cache() {
        let mut store = MockPokemonStore::new();
        store
            .expect_list_with_relations()
            .times(1)
            .returning(|_, _| Ok(vec![Pokemon::new("bulbasaur"), Pokemon::new("ivysaur")]));
        store.expect_count().times(2).returning(|| Ok(2));

        let cache = Arc::new(MemoryCache::new());
        let service = service_with(store, cache.clone());

        let (records, total) = service.list_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(total, 2);
        assert_eq!(cache.len().await, 1);

        // Second read is a hit: list_with_relations is not called again
        let (cached, total) = service.list_records().await.unwrap();
        assert_eq!(cached, records);
        assert_eq!(total, 2);
    }

    // Test 2: Cache failures fall back to the store
    #[tokio::test]
    async fn test_list_records_cache_errors_ignored() {
        let mut store = MockPokemonStore::new();
        store
            .expect_list_with_relations()
            .returning(|_, _| Ok(vec![Pokemon::new("mew")]));
        store.expect_count().returning(|| Ok(1));

        let mut cache = MockCacheStore::new();
        cache
            .expect_get()
            .returning(|_| Err(CacheError::Backend("down".to_string())));
        cache
            .expect_set()
            .returning(|_, _, _| Err(CacheError::Backend("down".to_string())));

        let service = service_with(store, Arc::new(cache));
        let (records, total) = service.list_records().await.unwrap();

        assert_eq!(records[0].name, "mew");
        assert_eq!(total, 1);
    }

    // Test 3: Store failure is surfaced
    #[tokio::test]
    async fn test_list_records_store_error() {
        let mut store = MockPokemonStore::new();
        store
            .expect_list_with_relations()
            .returning(|_, _| Err(crate::error::DbError::Migration("no schema".to_string())));

        let service = service_with(store, Arc::new(MemoryCache::new()));
        let result = service.list_records().await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }
}
