//! Circuit breaker guarding the sync pipeline
//!
//! Three explicit states with a fixed transition table:
//!
//! | from     | to       | trigger                                   |
//! |----------|----------|-------------------------------------------|
//! | Closed   | Open     | consecutive failures reach the threshold  |
//! | Open     | HalfOpen | cool-down timeout elapsed                 |
//! | HalfOpen | Closed   | a trial call succeeded                    |
//! | HalfOpen | Open     | a trial call failed                       |
//!
//! Every transition is logged and broadcast as a [`StateChange`].

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;

/// Capacity of the state change channel
const NOTIFY_CAPACITY: usize = 16;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Failing; calls are rejected without running
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl CircuitState {
    /// Returns true if the transition is part of the state machine
    pub fn can_transition_to(self, to: CircuitState) -> bool {
        matches!(
            (self, to),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request counters for the current generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

/// Notification emitted on every state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Breaker thresholds and timings
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub name: String,
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// Trial calls admitted while half-open
    pub max_half_open_requests: u32,
    /// Closed-state window after which counts reset; zero disables
    pub interval: Duration,
    /// Open-state cool-down
    pub timeout: Duration,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            name: config.name.clone(),
            failure_threshold: config.failure_threshold.max(1),
            max_half_open_requests: config.max_half_open_requests.max(1),
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

struct Inner {
    state: CircuitState,
    counts: Counts,
    generation: u64,
    /// Closed: end of the counting window. Open: end of the cool-down.
    expiry: Option<Instant>,
}

/// Circuit breaker for protecting against cascading failures
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    notifier: broadcast::Sender<StateChange>,
}

impl CircuitBreaker {
    /// Create a new breaker in the Closed state
    pub fn new(settings: BreakerSettings) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let now = Instant::now();
        let expiry = window_end(&settings, now);

        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                counts: Counts::default(),
                generation: 0,
                expiry,
            }),
            notifier,
        }
    }

    /// Create a breaker from configuration
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(BreakerSettings::from(config))
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Current state, applying any time-based transition that is due
    pub fn current_state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Counters of the current generation
    pub fn current_counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.notifier.subscribe()
    }

    /// Run `operation` through the breaker
    ///
    /// The operation is not polled at all when the breaker rejects the call.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_request()?;
        let guard = RequestGuard {
            breaker: self,
            generation,
            armed: true,
        };

        // The lock is never held across this await
        let result = operation().await;

        guard.finish(result.is_ok());
        result.map_err(CircuitBreakerError::Operation)
    }

    fn before_request<E>(&self) -> Result<u64, CircuitBreakerError<E>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            CircuitState::Open => {
                debug!(breaker = %self.settings.name, "Rejecting call, circuit open");
                return Err(CircuitBreakerError::Open {
                    name: self.settings.name.clone(),
                });
            }
            CircuitState::HalfOpen
                if inner.counts.requests >= self.settings.max_half_open_requests =>
            {
                debug!(breaker = %self.settings.name, "Rejecting call, half-open trials in use");
                return Err(CircuitBreakerError::TooManyRequests {
                    name: self.settings.name.clone(),
                });
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    fn after_request(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);

        // Outcome of a call that started in an earlier generation
        if inner.generation != generation {
            return;
        }

        if success {
            inner.counts.on_success();
            if inner.state == CircuitState::HalfOpen {
                self.transition(&mut inner, CircuitState::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match inner.state {
                CircuitState::Closed
                    if inner.counts.consecutive_failures >= self.settings.failure_threshold =>
                {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
                CircuitState::HalfOpen => {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
                _ => {}
            }
        }
    }

    /// Apply time-based changes: window reset while Closed, cool-down end while Open
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        let expired = inner.expiry.is_some_and(|at| at <= now);
        if !expired {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                debug!(breaker = %self.settings.name, "Counting window elapsed, resetting counts");
                self.new_generation(inner, now);
            }
            CircuitState::Open => self.transition(inner, CircuitState::HalfOpen, now),
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if !from.can_transition_to(to) {
            return;
        }

        inner.state = to;
        self.new_generation(inner, now);

        match to {
            CircuitState::Open => warn!(
                breaker = %self.settings.name,
                from = %from,
                to = %to,
                cooldown_secs = self.settings.timeout.as_secs(),
                "Circuit breaker state changed"
            ),
            _ => info!(
                breaker = %self.settings.name,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }

        // No subscribers is fine
        let _ = self.notifier.send(StateChange {
            name: self.settings.name.clone(),
            from,
            to,
        });
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.expiry = match inner.state {
            CircuitState::Closed => window_end(&self.settings, now),
            CircuitState::Open => Some(now + self.settings.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

/// Records an admitted call as failed if it never completes
///
/// Covers a dropped future (client disconnect, timeout) and a panicking
/// operation, both of which would otherwise hold a half-open trial slot.
struct RequestGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl RequestGuard<'_> {
    fn finish(mut self, success: bool) {
        self.armed = false;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(breaker = %self.breaker.settings.name, "Call abandoned, counting as failure");
            self.breaker.after_request(self.generation, false);
        }
    }
}

fn window_end(settings: &BreakerSettings, now: Instant) -> Option<Instant> {
    if settings.interval.is_zero() {
        None
    } else {
        Some(now + settings.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            name: "test".to_string(),
            failure_threshold: 3,
            max_half_open_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(30),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Err("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        breaker.execute(|| async { Ok(()) }).await
    }

    // Test 1: Transition table allows exactly four edges
    #[test]
    fn test_transition_table() {
        use CircuitState::*;
        let allowed = [(Closed, Open), (Open, HalfOpen), (HalfOpen, Closed), (HalfOpen, Open)];
        for from in [Closed, Open, HalfOpen] {
            for to in [Closed, Open, HalfOpen] {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    // Test 2: New breaker is closed with zero counts
    #[test]
    fn test_initial_state() {
        let breaker = CircuitBreaker::new(settings());
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.current_counts(), Counts::default());
    }

    // Test 3: Trips after threshold consecutive failures
    #[tokio::test]
    async fn test_trips_on_consecutive_failures() {
        let breaker = CircuitBreaker::new(settings());

        for _ in 0..2 {
            assert!(matches!(fail(&breaker).await, Err(CircuitBreakerError::Operation("boom"))));
            assert_eq!(breaker.current_state(), CircuitState::Closed);
        }
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    // Test 4: A success in between resets the consecutive counter
    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(settings());

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        let counts = breaker.current_counts();
        assert_eq!(counts.consecutive_failures, 1);
        assert_eq!(counts.total_failures, 3);
        assert_eq!(counts.requests, 4);
    }

    // Test 5: Open breaker rejects without running the operation
    #[tokio::test]
    async fn test_open_short_circuits() {
        let breaker = CircuitBreaker::new(settings());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), CircuitBreakerError<&str>> = breaker
            .execute(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            CircuitBreakerError::Open {
                name: "test".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // Test 6: Cool-down leads to half-open, trial success closes
    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = CircuitBreaker::new(settings());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.current_counts(), Counts::default());
    }

    // Test 7: Trial failure reopens and restarts the cool-down
    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(settings());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    // Test 8: Half-open admits a bounded number of trials
    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_budget() {
        let breaker = Arc::new(CircuitBreaker::new(settings()));
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = breaker.clone();
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let second = succeed(&breaker).await;
        assert_eq!(
            second.unwrap_err(),
            CircuitBreakerError::TooManyRequests {
                name: "test".to_string()
            }
        );

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    // Test 9: Counting window resets sparse failures while closed
    #[tokio::test(start_paused = true)]
    async fn test_interval_resets_counts() {
        let breaker = CircuitBreaker::new(BreakerSettings {
            interval: Duration::from_secs(60),
            ..settings()
        });

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.current_counts().consecutive_failures, 1);
    }

    // Test 10: Transitions are broadcast with name, from and to
    #[tokio::test(start_paused = true)]
    async fn test_state_change_notifications() {
        let breaker = CircuitBreaker::new(settings());
        let mut rx = breaker.subscribe();

        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&breaker).await.unwrap();

        let expected = [
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ];
        for (from, to) in expected {
            let change = rx.try_recv().unwrap();
            assert_eq!(change.name, "test");
            assert_eq!((change.from, change.to), (from, to));
        }
        assert!(rx.try_recv().is_err());
    }

    // Test 11: Config zero values are clamped
    #[test]
    fn test_settings_from_config() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            max_half_open_requests: 0,
            ..CircuitBreakerConfig::default()
        };
        let settings = BreakerSettings::from(&config);
        assert_eq!(settings.failure_threshold, 1);
        assert_eq!(settings.max_half_open_requests, 1);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.interval, Duration::from_secs(60));
    }

    // Test 12: A dropped trial releases its slot and reopens the breaker
    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_does_not_wedge_half_open() {
        let breaker = CircuitBreaker::new(settings());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        let trial = breaker.execute(|| async {
            std::future::pending::<()>().await;
            Ok::<_, &str>(())
        });
        assert!(tokio::time::timeout(Duration::from_secs(1), trial).await.is_err());
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    // Test 13: A panicking operation is counted as a failure
    #[tokio::test]
    async fn test_panicking_operation_counts_as_failure() {
        let breaker = Arc::new(CircuitBreaker::new(settings()));

        let task_breaker = breaker.clone();
        let joined = tokio::spawn(async move {
            task_breaker
                .execute(|| async {
                    if breaker_should_panic() {
                        panic!("operation panicked");
                    }
                    Ok::<_, &str>(())
                })
                .await
        })
        .await;
        assert!(joined.unwrap_err().is_panic());

        let counts = breaker.current_counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.consecutive_failures, 1);
    }

    fn breaker_should_panic() -> bool {
        true
    }
}
