//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use pokemon_sync::cache::{CacheStats, CacheStore, MemoryCache};
use pokemon_sync::config::{OverlapPolicy, SyncConfig};
use pokemon_sync::database::{PokemonStore, SqliteDatabase};
use pokemon_sync::error::{CacheError, SyncError};
use pokemon_sync::models::PokemonApiResponse;
use pokemon_sync::server::AppState;
use pokemon_sync::service::PokemonService;
use pokemon_sync::sync::{
    BreakerSettings, CircuitBreaker, JobScheduler, PokemonSource, RefreshJob, RetryManager,
    RetryPolicy, SyncOrchestrator,
};

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::new(":memory:")
            .await
            .expect("Failed to create test database"),
    )
}

/// Build a source record with the given types and a fixed ability set
pub fn api_record(id: u32, name: &str, types: &[&str]) -> PokemonApiResponse {
    let types: Vec<serde_json::Value> = types
        .iter()
        .enumerate()
        .map(|(i, t)| serde_json::json!({"slot": i + 1, "type": {"name": t, "url": ""}}))
        .collect();

    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": name,
        "height": 10 + id,
        "weight": 100 + id,
        "base_experience": 64,
        "order": id,
        "types": types,
        "abilities": [
            {"is_hidden": false, "slot": 1, "ability": {"name": "overgrow", "url": ""}},
            {"is_hidden": true, "slot": 3, "ability": {"name": "chlorophyll", "url": ""}}
        ],
        "sprites": {"front_default": null}
    }))
    .expect("valid record")
}

/// Source whose answers are scripted per identifier
#[derive(Default)]
pub struct ScriptedSource {
    overrides: Mutex<HashMap<u32, PokemonApiResponse>>,
    failing: Mutex<HashSet<u32>>,
    fail_all: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail fetches for these identifiers
    pub fn fail_ids(&self, ids: &[u32]) {
        self.failing.lock().extend(ids.iter().copied());
    }

    /// Fail (or stop failing) every fetch
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Serve `record` for `id` instead of the generated default
    pub fn set_record(&self, id: u32, record: PokemonApiResponse) {
        self.overrides.lock().insert(id, record);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PokemonSource for ScriptedSource {
    async fn fetch(
        &self,
        id: u32,
        _cancel: &CancellationToken,
    ) -> Result<PokemonApiResponse, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(&id) {
            return Err(SyncError::ServerError(503));
        }

        let record = self
            .overrides
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| api_record(id, &format!("pokemon-{}", id), &["normal"]));
        Ok(record)
    }
}

/// Memory cache that records pattern invalidations
#[derive(Default)]
pub struct RecordingCache {
    inner: MemoryCache,
    patterns: Mutex<Vec<String>>,
    fail_invalidation: AtomicBool,
}

impl RecordingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Patterns passed to delete_by_pattern, in call order
    pub fn invalidations(&self) -> Vec<String> {
        self.patterns.lock().clone()
    }

    pub fn set_fail_invalidation(&self, fail: bool) {
        self.fail_invalidation.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl CacheStore for RecordingCache {
    fn name(&self) -> &str {
        "recording"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(key, data, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        self.patterns.lock().push(pattern.to_string());
        if self.fail_invalidation.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected failure".to_string()));
        }
        self.inner.delete_by_pattern(pattern).await
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

/// Retry policy that gives up after the first failure
pub fn single_attempt_policy() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        max_elapsed_time: Duration::ZERO,
        jitter: 0.0,
        ..RetryPolicy::default()
    }
}

/// Breaker with the production threshold and a short cool-down
pub fn test_breaker(timeout: Duration) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(BreakerSettings {
        name: "pokemon-sync".to_string(),
        failure_threshold: 3,
        max_half_open_requests: 1,
        interval: Duration::from_secs(60),
        timeout,
    }))
}

/// Wired sync pipeline over the given collaborators
pub struct Pipeline {
    pub store: Arc<SqliteDatabase>,
    pub source: Arc<ScriptedSource>,
    pub cache: Arc<RecordingCache>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub job: Arc<RefreshJob>,
    pub shutdown: CancellationToken,
}

impl Pipeline {
    pub async fn new(last_id: u32, breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        let store = create_test_database().await;
        let source = ScriptedSource::new();
        let cache = RecordingCache::new();
        let shutdown = CancellationToken::new();

        let config = SyncConfig {
            first_id: 1,
            last_id,
            ..SyncConfig::default()
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(
            source.clone(),
            store.clone(),
            cache.clone(),
            &config,
        ));
        let job = Arc::new(RefreshJob::new(
            orchestrator.clone(),
            breaker,
            RetryManager::new(policy),
            OverlapPolicy::Skip,
            shutdown.clone(),
        ));

        Self {
            store,
            source,
            cache,
            orchestrator,
            job,
            shutdown,
        }
    }

    /// Application state for router tests
    pub fn app_state(&self) -> AppState {
        let store: Arc<dyn PokemonStore> = self.store.clone();
        let service = Arc::new(PokemonService::new(
            store,
            self.cache.clone(),
            self.orchestrator.clone(),
            self.job.clone(),
            Duration::from_secs(300),
            self.shutdown.clone(),
        ));

        AppState {
            service,
            scheduler: JobScheduler::new(),
            cache: self.cache.clone(),
        }
    }
}

/// Run a test server in the background and return the address
/// The server will be shut down when the returned shutdown sender is dropped or sent
pub async fn run_test_server(
    state: AppState,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = pokemon_sync::server::build_router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start (100ms is sufficient for slow CI systems)
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}
