//! Scheduled refresh job
//!
//! Wraps one orchestrator pass in the retry executor and the circuit
//! breaker: `breaker.execute(retry.execute(orchestrator.run_pass))`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OverlapPolicy;
use crate::error::{CircuitBreakerError, RetryError, SyncError};
use crate::models::SyncRunResult;

use super::circuit_breaker::{CircuitBreaker, CircuitState, Counts};
use super::orchestrator::SyncOrchestrator;
use super::retry::RetryManager;
use super::scheduler::{job_handler, JobHandler};

/// Error of a protected refresh
pub type RefreshError = CircuitBreakerError<RetryError<SyncError>>;

/// Outcome of one scheduled trigger
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The pass ran (it may still have failed)
    Ran(Result<SyncRunResult, RefreshError>),
    /// A previous pass was still in flight
    Skipped,
}

/// Resilient wrapper around the orchestrator
pub struct RefreshJob {
    orchestrator: Arc<SyncOrchestrator>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
    overlap: OverlapPolicy,
    in_flight: AtomicBool,
    shutdown: CancellationToken,
}

/// Clears the in-flight flag when the pass ends, even by panic
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RefreshJob {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryManager,
        overlap: OverlapPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            breaker,
            retry,
            overlap,
            in_flight: AtomicBool::new(false),
            shutdown,
        }
    }

    /// One pass through the breaker and the retry executor
    ///
    /// Ignores the overlap policy; used for manual protected triggers.
    pub async fn run_protected(&self) -> Result<SyncRunResult, RefreshError> {
        let orchestrator = &self.orchestrator;
        let retry = &self.retry;
        let cancel = &self.shutdown;

        self.breaker
            .execute(|| async move {
                retry
                    .execute(cancel, || async move { orchestrator.run_pass(cancel).await })
                    .await
            })
            .await
    }

    /// Scheduled entry point, honouring the overlap policy
    pub async fn execute(&self) -> RefreshOutcome {
        let _guard = match self.overlap {
            OverlapPolicy::Skip => {
                if self
                    .in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    warn!("Previous pokemon sync still running, skipping trigger");
                    return RefreshOutcome::Skipped;
                }
                Some(InFlightGuard(&self.in_flight))
            }
            OverlapPolicy::Allow => None,
        };

        let counts = self.breaker.current_counts();
        info!(
            started_at = %Utc::now().to_rfc3339(),
            breaker_state = %self.breaker.current_state(),
            consecutive_failures = counts.consecutive_failures,
            "Starting scheduled pokemon sync"
        );

        let started = Instant::now();
        let result = self.run_protected().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(run) => info!(
                duration_ms,
                success_count = run.success_count,
                error_count = run.error_count,
                "Scheduled pokemon sync finished"
            ),
            Err(e) if e.is_rejection() => warn!(
                duration_ms,
                error = %e,
                "Scheduled pokemon sync rejected by circuit breaker"
            ),
            Err(e) => error!(
                duration_ms,
                breaker_state = %self.breaker.current_state(),
                error = %e,
                "Scheduled pokemon sync failed"
            ),
        }

        RefreshOutcome::Ran(result)
    }

    /// Scheduler handler invoking [`RefreshJob::execute`]
    pub fn handler(self: &Arc<Self>) -> JobHandler {
        let job = Arc::clone(self);
        job_handler(move || {
            let job = job.clone();
            async move {
                job.execute().await;
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.current_state()
    }

    pub fn breaker_counts(&self) -> Counts {
        self.breaker.current_counts()
    }

    pub fn breaker_name(&self) -> &str {
        self.breaker.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MockCacheStore;
    use crate::config::SyncConfig;
    use crate::database::MockPokemonStore;
    use crate::models::{PokemonApiResponse, ReconciliationOutcome};
    use crate::sync::circuit_breaker::BreakerSettings;
    use crate::sync::retry::RetryPolicy;
    use crate::sync::source::{MockPokemonSource, PokemonSource};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn record(id: u32) -> PokemonApiResponse {
        serde_json::from_value(serde_json::json!({"id": id, "name": format!("p{}", id)})).unwrap()
    }

    fn no_retry() -> RetryManager {
        RetryManager::new(RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_elapsed_time: Duration::ZERO,
            jitter: 0.0,
            ..RetryPolicy::default()
        })
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(BreakerSettings {
            name: "test".to_string(),
            failure_threshold: 3,
            max_half_open_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }))
    }

    fn job_with(
        source: impl PokemonSource + 'static,
        breaker: Arc<CircuitBreaker>,
        overlap: OverlapPolicy,
    ) -> RefreshJob {
        let mut store = MockPokemonStore::new();
        store
            .expect_upsert_by_name()
            .returning(|_| Ok(ReconciliationOutcome::Created));
        let mut cache = MockCacheStore::new();
        cache.expect_delete_by_pattern().returning(|_| Ok(0));

        let config = SyncConfig {
            first_id: 1,
            last_id: 2,
            ..SyncConfig::default()
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(source),
            Arc::new(store),
            Arc::new(cache),
            &config,
        ));

        RefreshJob::new(orchestrator, breaker, no_retry(), overlap, CancellationToken::new())
    }

    // Test 1: Successful pass flows through both layers
    #[tokio::test]
    async fn test_run_protected_success() {
        let mut source = MockPokemonSource::new();
        source.expect_fetch().returning(|id, _| Ok(record(id)));

        let job = job_with(source, breaker(), OverlapPolicy::Skip);
        let result = job.run_protected().await.unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(job.breaker_state(), CircuitState::Closed);
    }

    // Test 2: Total failures trip the breaker, then calls short-circuit
    #[tokio::test]
    async fn test_total_failures_trip_breaker() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let mut source = MockPokemonSource::new();
        source.expect_fetch().returning(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::ServerError(503))
        });

        let job = job_with(source, breaker(), OverlapPolicy::Skip);
        for _ in 0..3 {
            let err = job.run_protected().await.unwrap_err();
            assert!(matches!(
                err,
                CircuitBreakerError::Operation(RetryError::Exhausted { .. })
            ));
        }
        assert_eq!(job.breaker_state(), CircuitState::Open);

        let before = calls.load(Ordering::SeqCst);
        let err = job.run_protected().await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    // Test 3: Skip policy drops a trigger while a pass is in flight
    #[tokio::test]
    async fn test_overlap_skip() {
        let mut source = MockPokemonSource::new();
        source.expect_fetch().returning(|id, _| Ok(record(id)));

        let job = job_with(source, breaker(), OverlapPolicy::Skip);
        job.in_flight.store(true, Ordering::SeqCst);

        assert_eq!(job.execute().await, RefreshOutcome::Skipped);

        job.in_flight.store(false, Ordering::SeqCst);
        assert!(matches!(job.execute().await, RefreshOutcome::Ran(Ok(_))));
        assert!(!job.is_running());
    }

    // Test 4: Allow policy runs regardless of the flag
    #[tokio::test]
    async fn test_overlap_allow() {
        let mut source = MockPokemonSource::new();
        source.expect_fetch().returning(|id, _| Ok(record(id)));

        let job = job_with(source, breaker(), OverlapPolicy::Allow);
        job.in_flight.store(true, Ordering::SeqCst);

        assert!(matches!(job.execute().await, RefreshOutcome::Ran(Ok(_))));
    }

    struct GatedSource {
        release: tokio::sync::watch::Receiver<bool>,
    }

    #[async_trait::async_trait]
    impl PokemonSource for GatedSource {
        async fn fetch(
            &self,
            id: u32,
            _cancel: &CancellationToken,
        ) -> Result<PokemonApiResponse, SyncError> {
            let mut release = self.release.clone();
            let _ = release.wait_for(|open| *open).await;
            Ok(record(id))
        }
    }

    // Test 5: Concurrent triggers under Skip run exactly one pass
    #[tokio::test]
    async fn test_concurrent_triggers_skip() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let job = Arc::new(job_with(
            GatedSource { release: release_rx },
            breaker(),
            OverlapPolicy::Skip,
        ));

        let first_job = job.clone();
        let first = tokio::spawn(async move { first_job.execute().await });

        while !job.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(job.execute().await, RefreshOutcome::Skipped);

        release_tx.send(true).unwrap();
        assert!(matches!(first.await.unwrap(), RefreshOutcome::Ran(Ok(_))));
        assert!(!job.is_running());
    }

    // Test 6: Handler wraps execute for the scheduler
    #[tokio::test]
    async fn test_handler_runs_pass() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let mut source = MockPokemonSource::new();
        source.expect_fetch().returning(move |id, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(record(id))
        });

        let job = Arc::new(job_with(source, breaker(), OverlapPolicy::Skip));
        let handler = job.handler();
        handler().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
