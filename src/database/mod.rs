//! Database layer for pokemon-sync
//!
//! This module defines the record store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;

use crate::error::DbError;
use crate::models::{Pokemon, ReconciliationOutcome};

/// Persistent store for pokemon records
///
/// Records are keyed by name. Implementations must apply
/// [`PokemonStore::upsert_by_name`] atomically: the lookup, the child-row
/// replacement and the scalar write either all become visible or none do.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PokemonStore: Send + Sync {
    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Look up a record, with its types and abilities, by natural key
    async fn find_by_name(&self, name: &str) -> Result<Option<Pokemon>, DbError>;

    /// Create, update or skip `pokemon` depending on what is stored under its name
    ///
    /// On update the stored id and creation time are kept and both child
    /// collections are replaced wholesale.
    async fn upsert_by_name(&self, pokemon: &Pokemon) -> Result<ReconciliationOutcome, DbError>;

    // =========================================================================
    // Read path
    // =========================================================================

    /// Number of stored records
    async fn count(&self) -> Result<u64, DbError>;

    /// Records ordered by id, with relations; a zero `limit` returns everything
    async fn list_with_relations(&self, limit: u32, offset: u32) -> Result<Vec<Pokemon>, DbError>;
}
