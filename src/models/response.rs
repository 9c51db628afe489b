//! JSON bodies returned by the HTTP layer

use serde::{Deserialize, Serialize};

use super::pokemon::Pokemon;

/// Envelope shared by every API response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct GeneralResponse<T> {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> GeneralResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonTypeResponse {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonAbilityResponse {
    pub name: String,
    pub is_hidden: bool,
}

/// One pokemon as exposed to API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonResponse {
    pub id: i64,
    pub name: String,
    pub height: i64,
    pub weight: i64,
    pub base_experience: i64,
    pub order: i64,
    pub types: Vec<PokemonTypeResponse>,
    pub abilities: Vec<PokemonAbilityResponse>,
    /// RFC 3339, empty when unknown
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Pokemon> for PokemonResponse {
    fn from(pokemon: &Pokemon) -> Self {
        Self {
            id: pokemon.id.unwrap_or_default(),
            name: pokemon.name.clone(),
            height: pokemon.height,
            weight: pokemon.weight,
            base_experience: pokemon.base_experience,
            order: pokemon.order,
            types: pokemon
                .types
                .iter()
                .map(|t| PokemonTypeResponse {
                    name: t.name.clone(),
                })
                .collect(),
            abilities: pokemon
                .abilities
                .iter()
                .map(|a| PokemonAbilityResponse {
                    name: a.name.clone(),
                    is_hidden: a.is_hidden,
                })
                .collect(),
            created_at: pokemon
                .created_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            updated_at: pokemon
                .updated_at
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        }
    }
}

/// Paged list of pokemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PokemonListResponse {
    pub items: Vec<PokemonResponse>,
    pub total: u64,
    pub page: u32,
    pub limit: usize,
}

impl PokemonListResponse {
    /// Single page holding every record
    pub fn single_page(records: &[Pokemon], total: u64) -> Self {
        let items: Vec<PokemonResponse> = records.iter().map(PokemonResponse::from).collect();
        let limit = items.len();
        Self {
            items,
            total,
            page: 1,
            limit,
        }
    }
}
