//! Application error types for pokemon-sync
//!
//! This module defines the error taxonomy used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;

use thiserror::Error;

/// Cache-related errors
///
/// A cache miss is not an error: lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend (connection or command) failure
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Invalid key pattern
    #[error("Invalid cache pattern: {0}")]
    InvalidPattern(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Background connection closed or failed outside of SQLite
    #[error("Database connection error: {0}")]
    Connection(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Synchronization-related errors
///
/// Covers both single-record fetches from the source and whole-pass outcomes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by upstream
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found")]
    NotFound,

    /// Unauthorized
    #[error("Unauthorized")]
    Unauthorized,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),

    /// Every identifier in a pass failed
    #[error("All {errors} pokemon sync attempts failed")]
    AllFailed {
        /// Number of identifiers that failed
        errors: u32,
    },

    /// The pass was cancelled before it could finish
    #[error("Sync cancelled")]
    Cancelled,
}

/// Scheduler-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    /// Cadence expression could not be parsed
    #[error("Invalid cadence '{cadence}': {reason}")]
    InvalidCadence {
        /// The rejected expression
        cadence: String,
        /// Parser message
        reason: String,
    },

    /// Cadence has no upcoming fire time
    #[error("Cadence '{0}' never fires")]
    Exhausted(String),
}

/// Errors returned by [`crate::sync::circuit_breaker::CircuitBreaker::execute`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CircuitBreakerError<E> {
    /// Breaker is open; the operation was not attempted
    #[error("Circuit breaker '{name}' is open")]
    Open {
        /// Breaker name
        name: String,
    },

    /// Breaker is half-open and the trial budget is used up
    #[error("Circuit breaker '{name}' rejected request: too many half-open trials")]
    TooManyRequests {
        /// Breaker name
        name: String,
    },

    /// The protected operation itself failed
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the call was short-circuited without running the operation
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitBreakerError::Operation(_))
    }
}

/// Errors returned by [`crate::sync::retry::RetryManager::execute`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The enclosing context was cancelled while waiting between attempts
    #[error("Retry cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
    },

    /// The elapsed-time or attempt budget ran out
    #[error("Gave up after {attempts} attempt(s) in {elapsed:?}: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Time since the first attempt
        elapsed: Duration,
        /// Error from the final attempt
        last: E,
    },

    /// The operation returned an error that must not be retried
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// Returns the last operation error, if there was one
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Permanent(err) => Some(err),
        }
    }
}

/// Logging initialisation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryError {
    /// Subscriber could not be installed
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Application-level error type
///
/// This is the main error type used by the service layer.
/// It aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServerError(code) if *code >= 500 => true,
            SyncError::Network(_) => true,
            SyncError::AllFailed { .. } => true,

            // Non-retryable errors
            SyncError::InvalidData(_) => false,
            SyncError::NotFound => false,
            SyncError::Unauthorized => false,
            SyncError::ServerError(_) => false, // 4xx errors
            SyncError::Cancelled => false,
        }
    }
}
