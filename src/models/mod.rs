//! Domain models for pokemon-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod pokemon;
pub mod response;
pub mod run;
pub mod source;

// Re-export commonly used types
pub use pokemon::{Pokemon, PokemonAbility, PokemonType, ReconciliationOutcome};
pub use response::{GeneralResponse, PokemonListResponse, PokemonResponse};
pub use run::SyncRunResult;
pub use source::PokemonApiResponse;
