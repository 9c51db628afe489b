//! HTTP router for pokemon-sync
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - Manual sync triggers and the stored pokemon list
//! - Job control and circuit breaker status

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::models::{GeneralResponse, PokemonListResponse, SyncRunResult};
use crate::service::PokemonService;
use crate::sync::{CircuitState, Counts, JobInfo, JobScheduler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Sync triggers and read path
    pub service: Arc<PokemonService>,

    /// Job registry
    pub scheduler: JobScheduler,

    /// Cache backend, for stats
    pub cache: Arc<dyn CacheStore>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Query string of `POST /api/v1/sync`
#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    /// Route through the circuit breaker and retry executor
    #[serde(default)]
    pub protected: bool,
}

/// Circuit breaker status body
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BreakerStatusResponse {
    pub name: String,
    pub state: String,
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl BreakerStatusResponse {
    fn new(name: &str, state: CircuitState, counts: Counts) -> Self {
        Self {
            name: name.to_string(),
            state: state.to_string(),
            requests: counts.requests,
            total_successes: counts.total_successes,
            total_failures: counts.total_failures,
            consecutive_successes: counts.consecutive_successes,
            consecutive_failures: counts.consecutive_failures,
        }
    }
}

/// Build the main application router
///
/// # Arguments
///
/// * `state` - Application state containing the service and scheduler
///
/// # Returns
///
/// An axum Router configured with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/sync", post(api_trigger_sync_handler))
        .route("/api/v1/items", get(api_list_items_handler))
        .route("/api/v1/jobs", get(api_list_jobs_handler))
        .route("/api/v1/jobs/:name", delete(api_remove_job_handler))
        .route("/api/v1/circuit-breaker", get(api_breaker_handler))
        .route("/api/v1/cache/stats", get(api_cache_stats_handler))
        .with_state(state)
}

// =============================================================================
// Health Handler
// =============================================================================

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// API Handlers
// =============================================================================

/// Run one sync pass now
async fn api_trigger_sync_handler(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
) -> (StatusCode, Json<GeneralResponse<SyncRunResult>>) {
    if query.protected {
        return match state.service.trigger_protected_sync().await {
            Ok(result) => (
                StatusCode::OK,
                Json(GeneralResponse::success("Sync completed", result)),
            ),
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "Manual sync rejected by circuit breaker");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(GeneralResponse::failure(e.to_string())),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "Manual protected sync failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(GeneralResponse::failure(e.to_string())),
                )
            }
        };
    }

    match state.service.trigger_sync().await {
        Ok(result) => (
            StatusCode::OK,
            Json(GeneralResponse::success("Sync completed", result)),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Manual sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GeneralResponse::failure(e.to_string())),
            )
        }
    }
}

/// List stored pokemon
async fn api_list_items_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<GeneralResponse<PokemonListResponse>>) {
    match state.service.list_records().await {
        Ok((records, total)) => (
            StatusCode::OK,
            Json(GeneralResponse::success(
                "OK",
                PokemonListResponse::single_page(&records, total),
            )),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list pokemon");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GeneralResponse::failure(e.to_string())),
            )
        }
    }
}

/// Registered jobs
async fn api_list_jobs_handler(
    State(state): State<AppState>,
) -> Json<GeneralResponse<Vec<JobInfo>>> {
    let jobs = state.scheduler.job_info().await;
    Json(GeneralResponse::success("OK", jobs))
}

/// Remove a job by name
async fn api_remove_job_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<GeneralResponse<()>>) {
    if state.scheduler.remove_job(&name).await {
        (
            StatusCode::OK,
            Json(GeneralResponse::success(format!("Job '{}' removed", name), ())),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(GeneralResponse::failure(format!("Job '{}' not found", name))),
        )
    }
}

/// Circuit breaker state and counters
async fn api_breaker_handler(
    State(state): State<AppState>,
) -> Json<GeneralResponse<BreakerStatusResponse>> {
    let job = state.service.refresh_job();
    let status =
        BreakerStatusResponse::new(job.breaker_name(), job.breaker_state(), job.breaker_counts());
    Json(GeneralResponse::success("OK", status))
}

/// Cache stats API handler
async fn api_cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats().await;
    Json(serde_json::json!({
        "backend": state.cache.name(),
        "entries": stats.entries,
        "hits": stats.hits,
        "misses": stats.misses,
        "invalidations": stats.invalidations,
        "hit_rate": stats.hit_rate(),
    }))
}
