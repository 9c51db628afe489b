//! SQLite implementation of the PokemonStore trait
//!
//! This module provides a SQLite-based implementation of the PokemonStore trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::PokemonStore;
use crate::error::DbError;
use crate::models::{Pokemon, PokemonAbility, PokemonType, ReconciliationOutcome};

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", migration_version())?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }

    /// Schema version recorded by the last migration run
    pub async fn schema_version(&self) -> Result<i32, DbError> {
        self.conn
            .call(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl PokemonStore for SqliteDatabase {
    // =========================================================================
    // Reconciliation
    // =========================================================================

    async fn find_by_name(&self, name: &str) -> Result<Option<Pokemon>, DbError> {
        let name = name.to_string();

        self.conn
            .call(move |conn| Ok(find_in(conn, &name)?))
            .await
            .map_err(Into::into)
    }

    async fn upsert_by_name(&self, pokemon: &Pokemon) -> Result<ReconciliationOutcome, DbError> {
        let pokemon = pokemon.clone();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existing = find_in(&tx, &pokemon.name)?;
                let outcome = ReconciliationOutcome::decide(existing.as_ref(), &pokemon);
                let now = Utc::now().to_rfc3339();

                match outcome {
                    ReconciliationOutcome::Unchanged => {}
                    ReconciliationOutcome::Updated => {
                        let id = existing
                            .and_then(|stored| stored.id)
                            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

                        tx.execute("DELETE FROM pokemon_type WHERE pokemon_id = ?1", [id])?;
                        tx.execute("DELETE FROM pokemon_ability WHERE pokemon_id = ?1", [id])?;
                        tx.execute(
                            r#"
                            UPDATE pokemon
                            SET height = ?1, weight = ?2, base_experience = ?3, order_num = ?4,
                                updated_at = ?5
                            WHERE id = ?6
                            "#,
                            rusqlite::params![
                                pokemon.height,
                                pokemon.weight,
                                pokemon.base_experience,
                                pokemon.order,
                                now,
                                id
                            ],
                        )?;
                        insert_children(&tx, id, &pokemon, &now)?;
                    }
                    ReconciliationOutcome::Created => {
                        tx.execute(
                            r#"
                            INSERT INTO pokemon
                            (name, height, weight, base_experience, order_num, created_at, updated_at)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                            "#,
                            rusqlite::params![
                                pokemon.name,
                                pokemon.height,
                                pokemon.weight,
                                pokemon.base_experience,
                                pokemon.order,
                                now
                            ],
                        )?;
                        let id = tx.last_insert_rowid();
                        insert_children(&tx, id, &pokemon, &now)?;
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    async fn count(&self) -> Result<u64, DbError> {
        let count: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM pokemon", [], |row| row.get(0))?))
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_with_relations(&self, limit: u32, offset: u32) -> Result<Vec<Pokemon>, DbError> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit: i64 = if limit == 0 { -1 } else { i64::from(limit) };
        let offset = i64::from(offset);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, name, height, weight, base_experience, order_num, created_at, updated_at
                    FROM pokemon
                    ORDER BY id ASC
                    LIMIT ?1 OFFSET ?2
                    "#,
                )?;

                let mut records = stmt
                    .query_map([limit, offset], map_pokemon_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                for record in &mut records {
                    if let Some(id) = record.id {
                        let (types, abilities) = load_children(conn, id)?;
                        record.types = types;
                        record.abilities = abilities;
                    }
                }

                Ok(records)
            })
            .await
            .map_err(Into::into)
    }
}

/// Load one record with its relations
fn find_in(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<Option<Pokemon>> {
    let record = conn
        .query_row(
            r#"
            SELECT id, name, height, weight, base_experience, order_num, created_at, updated_at
            FROM pokemon
            WHERE name = ?1
            "#,
            [name],
            map_pokemon_row,
        )
        .optional()?;

    match record {
        Some(mut record) => {
            if let Some(id) = record.id {
                let (types, abilities) = load_children(conn, id)?;
                record.types = types;
                record.abilities = abilities;
            }
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

fn map_pokemon_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pokemon> {
    Ok(Pokemon {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        height: row.get(2)?,
        weight: row.get(3)?,
        base_experience: row.get(4)?,
        order: row.get(5)?,
        types: Vec::new(),
        abilities: Vec::new(),
        created_at: parse_datetime(row.get::<_, Option<String>>(6)?),
        updated_at: parse_datetime(row.get::<_, Option<String>>(7)?),
    })
}

fn load_children(
    conn: &rusqlite::Connection,
    pokemon_id: i64,
) -> rusqlite::Result<(Vec<PokemonType>, Vec<PokemonAbility>)> {
    let types = conn
        .prepare("SELECT type_name FROM pokemon_type WHERE pokemon_id = ?1 ORDER BY id")?
        .query_map([pokemon_id], |row| Ok(PokemonType::new(row.get::<_, String>(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let abilities = conn
        .prepare(
            "SELECT ability_name, is_hidden FROM pokemon_ability WHERE pokemon_id = ?1 ORDER BY id",
        )?
        .query_map([pokemon_id], |row| {
            Ok(PokemonAbility::new(
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((types, abilities))
}

fn insert_children(
    conn: &rusqlite::Connection,
    pokemon_id: i64,
    pokemon: &Pokemon,
    now: &str,
) -> rusqlite::Result<()> {
    let mut insert_type = conn.prepare(
        "INSERT INTO pokemon_type (pokemon_id, type_name, created_at) VALUES (?1, ?2, ?3)",
    )?;
    for kind in &pokemon.types {
        insert_type.execute(rusqlite::params![pokemon_id, kind.name, now])?;
    }

    let mut insert_ability = conn.prepare(
        r#"
        INSERT INTO pokemon_ability (pokemon_id, ability_name, is_hidden, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )?;
    for ability in &pokemon.abilities {
        insert_ability.execute(rusqlite::params![
            pokemon_id,
            ability.name,
            ability.is_hidden,
            now
        ])?;
    }

    Ok(())
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
