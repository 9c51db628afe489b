//! Source client for the upstream PokeAPI
//!
//! This module provides the [`PokemonSource`] seam used by the orchestrator
//! and its HTTP implementation with concurrency limiting, a minimum request
//! interval, and a bounded per-fetch retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::{RetryableError, SyncError};
use crate::models::PokemonApiResponse;

/// Wait used when a 429 carries no usable Retry-After header
const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 1;

/// Upstream record source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PokemonSource: Send + Sync {
    /// Fetch one record by numeric identifier
    ///
    /// `cancel` aborts any wait between attempts.
    async fn fetch(
        &self,
        id: u32,
        cancel: &CancellationToken,
    ) -> Result<PokemonApiResponse, SyncError>;
}

/// HTTP client for `GET {base_url}/pokemon/{id}`
///
/// Features:
/// - Global concurrent request limiting via semaphore
/// - Minimum interval between consecutive requests
/// - HTTP 429 handling with Retry-After support
/// - Linear per-fetch retry (`attempt` × delay unit) for retryable errors
#[derive(Debug)]
pub struct PokeApiClient {
    client: Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl PokeApiClient {
    /// Create a client from configuration
    pub fn new(config: &SourceConfig) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| SyncError::InvalidData(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, agent);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self::with_client(client, config))
    }

    /// Create a client around a custom reqwest Client
    pub fn with_client(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(None)),
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Override the per-fetch retry delay unit
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get number of available permits (concurrent request slots)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// One HTTP round trip, no retry
    pub async fn fetch_once(&self, id: u32) -> Result<PokemonApiResponse, SyncError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::Network("request limiter closed".to_string()))?;

        self.wait_for_interval().await;

        let url = format!("{}/pokemon/{}", self.base_url, id);
        debug!(url = %url, "Sending HTTP GET request");

        let response = self.client.get(&url).send().await.map_err(map_transport)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(map_transport)?;
                serde_json::from_slice(&body).map_err(|e| {
                    warn!(url = %url, error = %e, "Undecodable response body");
                    SyncError::InvalidData(e.to_string())
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);

                warn!(url = %url, retry_after = wait, "Rate limited by upstream");
                Err(SyncError::RateLimited(wait))
            }
            StatusCode::NOT_FOUND => {
                debug!(url = %url, "Resource not found (404)");
                Err(SyncError::NotFound)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(url = %url, status = ?response.status(), "Unauthorized");
                Err(SyncError::Unauthorized)
            }
            status => {
                warn!(url = %url, status = status.as_u16(), "Unexpected status");
                Err(SyncError::ServerError(status.as_u16()))
            }
        }
    }

    async fn wait_for_interval(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!(wait_ms = wait_time.as_millis() as u64, "Waiting for request interval");
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn map_transport(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::NetworkTimeout
    } else if e.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(e.to_string())
    }
}

#[async_trait]
impl PokemonSource for PokeApiClient {
    async fn fetch(
        &self,
        id: u32,
        cancel: &CancellationToken,
    ) -> Result<PokemonApiResponse, SyncError> {
        let mut attempt: u32 = 0;

        loop {
            let err = match self.fetch_once(id).await {
                Ok(record) => return Ok(record),
                Err(err) => err,
            };

            attempt += 1;
            if attempt > self.max_retries || !err.is_retryable() {
                return Err(err);
            }

            let delay = self.retry_delay * attempt;
            warn!(
                pokemon_id = id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Fetch failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
