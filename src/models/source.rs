//! Wire format of the upstream PokeAPI `/pokemon/{id}` endpoint
//!
//! Only the fields the sync pipeline consumes are modelled; unknown fields
//! are ignored by serde.

use serde::{Deserialize, Serialize};

use super::pokemon::{Pokemon, PokemonAbility, PokemonType};

/// A `{name, url}` reference to another API resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Type slot of a pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonTypeSlot {
    pub slot: u32,
    #[serde(rename = "type")]
    pub kind: NamedResource,
}

/// Ability slot of a pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonAbilitySlot {
    #[serde(default)]
    pub is_hidden: bool,
    pub slot: u32,
    pub ability: NamedResource,
}

/// Sprite URLs; any of them may be null upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonSprites {
    pub front_default: Option<String>,
    pub back_default: Option<String>,
    pub front_shiny: Option<String>,
    pub back_shiny: Option<String>,
}

/// One pokemon as returned by the source API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonApiResponse {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub weight: i64,
    /// Null upstream for some forms
    #[serde(default)]
    pub base_experience: Option<i64>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub types: Vec<PokemonTypeSlot>,
    #[serde(default)]
    pub abilities: Vec<PokemonAbilitySlot>,
    #[serde(default)]
    pub sprites: PokemonSprites,
}

impl From<PokemonApiResponse> for Pokemon {
    fn from(api: PokemonApiResponse) -> Self {
        Pokemon {
            id: None,
            name: api.name,
            height: api.height,
            weight: api.weight,
            base_experience: api.base_experience.unwrap_or(0),
            order: api.order,
            types: api
                .types
                .into_iter()
                .map(|slot| PokemonType::new(slot.kind.name))
                .collect(),
            abilities: api
                .abilities
                .into_iter()
                .map(|slot| PokemonAbility::new(slot.ability.name, slot.is_hidden))
                .collect(),
            created_at: None,
            updated_at: None,
        }
    }
}
