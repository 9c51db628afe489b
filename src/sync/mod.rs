//! Data synchronization infrastructure
//!
//! This module provides the periodic pokemon refresh pipeline: an upstream
//! source client, the per-pass orchestrator, and the resilience layers that
//! wrap it.
//!
//! # Components
//!
//! - [`source`]: Rate-limited PokeAPI client behind the [`PokemonSource`] trait
//! - [`orchestrator`]: One pass over the identifier range with reconciliation
//! - [`retry`]: Retry executor with exponential backoff and an elapsed-time budget
//! - [`circuit_breaker`]: Closed/Open/HalfOpen breaker with state notifications
//! - [`scheduler`]: Registry of named cron jobs
//! - [`job`]: Refresh job tying the breaker, retry and orchestrator together
//!
//! # Example
//!
//! ```ignore
//! use pokemon_sync::sync::{CircuitBreaker, RefreshJob, RetryManager, SyncOrchestrator};
//!
//! let orchestrator = Arc::new(SyncOrchestrator::new(source, store, cache, &config.sync));
//! let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
//! let retry = RetryManager::new(RetryPolicy::from(&config.retry));
//! let job = Arc::new(RefreshJob::new(orchestrator, breaker, retry, config.sync.overlap, shutdown));
//!
//! scheduler.add_job(&config.sync.job_name, &config.sync.cadence, job.handler()).await?;
//! scheduler.start().await;
//! ```

pub mod circuit_breaker;
pub mod job;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod source;

// Re-export main types for convenience
pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState, Counts, StateChange};
pub use job::{RefreshError, RefreshJob, RefreshOutcome};
pub use orchestrator::{SyncOrchestrator, POKEMON_CACHE_PATTERN};
pub use retry::{Backoff, RetryManager, RetryPolicy};
pub use scheduler::{job_handler, JobHandler, JobInfo, JobScheduler};
pub use source::{PokeApiClient, PokemonSource};

#[cfg(test)]
pub use source::MockPokemonSource;
