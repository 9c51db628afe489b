//! Stored pokemon record and the reconciliation rules applied to it
//!
//! A [`Pokemon`] is keyed by its natural key, `name`. The surrogate `id` and
//! `created_at` are assigned by the store on first creation and never change
//! afterwards.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type tag attached to a pokemon
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PokemonType {
    pub name: String,
}

impl PokemonType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Ability attached to a pokemon
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PokemonAbility {
    pub name: String,
    pub is_hidden: bool,
}

impl PokemonAbility {
    pub fn new(name: impl Into<String>, is_hidden: bool) -> Self {
        Self {
            name: name.into(),
            is_hidden,
        }
    }
}

/// Persisted projection of a source record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pokemon {
    /// Surrogate key (None until stored)
    pub id: Option<i64>,

    /// Natural key
    pub name: String,

    pub height: i64,
    pub weight: i64,
    pub base_experience: i64,
    pub order: i64,

    /// Type tags, unordered
    pub types: Vec<PokemonType>,

    /// Abilities, unordered
    pub abilities: Vec<PokemonAbility>,

    /// When the record was first stored
    pub created_at: Option<DateTime<Utc>>,

    /// When the record was last written
    pub updated_at: Option<DateTime<Utc>>,
}

impl Pokemon {
    /// Create an unsaved record with zeroed scalars
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            height: 0,
            weight: 0,
            base_experience: 0,
            order: 0,
            types: Vec::new(),
            abilities: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Set height, weight, base experience and order
    pub fn with_stats(mut self, height: i64, weight: i64, base_experience: i64, order: i64) -> Self {
        self.height = height;
        self.weight = weight;
        self.base_experience = base_experience;
        self.order = order;
        self
    }

    /// Set the type tags
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(PokemonType::new).collect();
        self
    }

    /// Set the abilities as `(name, is_hidden)` pairs
    pub fn with_abilities<I, S>(mut self, abilities: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        self.abilities = abilities
            .into_iter()
            .map(|(name, hidden)| PokemonAbility::new(name, hidden))
            .collect();
        self
    }

    /// True when every scalar field matches
    pub fn same_scalars(&self, other: &Pokemon) -> bool {
        self.name == other.name
            && self.height == other.height
            && self.weight == other.weight
            && self.base_experience == other.base_experience
            && self.order == other.order
    }

    /// True when `incoming` would not change this stored record
    ///
    /// Child collections are compared as sets: order is ignored, lengths
    /// must match, and duplicates are kept when counting length.
    pub fn is_unchanged(&self, incoming: &Pokemon) -> bool {
        self.same_scalars(incoming)
            && same_members(&self.types, &incoming.types)
            && same_members(&self.abilities, &incoming.abilities)
    }
}

fn same_members<T: Eq + Hash>(existing: &[T], incoming: &[T]) -> bool {
    if existing.len() != incoming.len() {
        return false;
    }
    let known: HashSet<&T> = existing.iter().collect();
    incoming.iter().all(|item| known.contains(item))
}

/// What a reconciliation step did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationOutcome {
    /// Stored record already matched; nothing written
    Unchanged,
    /// Scalars rewritten and child rows replaced
    Updated,
    /// New record inserted
    Created,
}

impl ReconciliationOutcome {
    /// Decide the outcome for `incoming` given the currently stored record
    pub fn decide(existing: Option<&Pokemon>, incoming: &Pokemon) -> Self {
        match existing {
            None => ReconciliationOutcome::Created,
            Some(stored) if stored.is_unchanged(incoming) => ReconciliationOutcome::Unchanged,
            Some(_) => ReconciliationOutcome::Updated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Unchanged => "unchanged",
            ReconciliationOutcome::Updated => "updated",
            ReconciliationOutcome::Created => "created",
        }
    }
}

impl fmt::Display for ReconciliationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
