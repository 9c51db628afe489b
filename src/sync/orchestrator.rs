//! Sync orchestrator
//!
//! One pass walks the configured identifier range in increasing order,
//! fetches each record from the source, reconciles it against the store,
//! and finally invalidates the cached pokemon views once.

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::database::PokemonStore;
use crate::error::SyncError;
use crate::models::{Pokemon, ReconciliationOutcome, SyncRunResult};

use super::source::PokemonSource;

/// Cache pattern covering every derived pokemon view
pub const POKEMON_CACHE_PATTERN: &str = "pokemon:*";

/// Runs synchronization passes
pub struct SyncOrchestrator {
    source: Arc<dyn PokemonSource>,
    store: Arc<dyn PokemonStore>,
    cache: Arc<dyn CacheStore>,
    ids: RangeInclusive<u32>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn PokemonSource>,
        store: Arc<dyn PokemonStore>,
        cache: Arc<dyn CacheStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            cache,
            ids: config.first_id..=config.last_id,
        }
    }

    /// Identifiers covered by one pass
    pub fn id_range(&self) -> RangeInclusive<u32> {
        self.ids.clone()
    }

    /// Perform one pass
    ///
    /// Per-identifier failures are counted and skipped. The pass fails only
    /// when nothing succeeded or when `cancel` fired before the range was
    /// covered. Cache invalidation runs after all identifiers in every case.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncRunResult, SyncError> {
        info!(
            first_id = *self.ids.start(),
            last_id = *self.ids.end(),
            "Starting pokemon sync pass"
        );

        let mut result = SyncRunResult::default();
        let mut cancelled = false;

        for id in self.ids.clone() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            match self.sync_one(id, cancel).await {
                Ok(outcome) => {
                    debug!(pokemon_id = id, outcome = %outcome, "Reconciled pokemon");
                    result.record_success(outcome);
                }
                Err(SyncError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(_) => result.record_error(),
            }
        }

        self.invalidate_cache().await;

        if cancelled {
            warn!(
                success_count = result.success_count,
                error_count = result.error_count,
                "Pokemon sync pass cancelled"
            );
            return Err(SyncError::Cancelled);
        }

        if result.is_total_failure() {
            error!(error_count = result.error_count, "Pokemon sync pass failed");
            return Err(SyncError::AllFailed {
                errors: result.error_count,
            });
        }

        if result.is_partial() {
            warn!(
                success_count = result.success_count,
                error_count = result.error_count,
                "Pokemon sync completed with errors"
            );
        } else {
            info!(
                success_count = result.success_count,
                created = result.created,
                updated = result.updated,
                unchanged = result.unchanged,
                "Pokemon sync completed"
            );
        }

        Ok(result)
    }

    async fn sync_one(
        &self,
        id: u32,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationOutcome, SyncError> {
        let record = match self.source.fetch(id, cancel).await {
            Ok(record) => record,
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => {
                error!(pokemon_id = id, error = %e, "Failed to fetch pokemon");
                return Err(e);
            }
        };

        let pokemon = Pokemon::from(record);
        self.store.upsert_by_name(&pokemon).await.map_err(|e| {
            error!(pokemon_id = id, name = %pokemon.name, error = %e, "Failed to save pokemon");
            SyncError::InvalidData(e.to_string())
        })
    }

    async fn invalidate_cache(&self) {
        match self.cache.delete_by_pattern(POKEMON_CACHE_PATTERN).await {
            Ok(removed) => debug!(
                pattern = POKEMON_CACHE_PATTERN,
                removed, "Invalidated pokemon cache"
            ),
            Err(e) => warn!(
                pattern = POKEMON_CACHE_PATTERN,
                error = %e,
                "Failed to invalidate pokemon cache"
            ),
        }
    }
}
