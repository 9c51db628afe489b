//! Database migrations for pokemon-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Pokemon table, natural key is name
CREATE TABLE IF NOT EXISTS pokemon (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    height INTEGER NOT NULL DEFAULT 0,
    weight INTEGER NOT NULL DEFAULT 0,
    base_experience INTEGER NOT NULL DEFAULT 0,
    order_num INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- Type tags, replaced wholesale on update
CREATE TABLE IF NOT EXISTS pokemon_type (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pokemon_id INTEGER NOT NULL REFERENCES pokemon(id) ON DELETE CASCADE,
    type_name TEXT NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_pokemon_type_pokemon_id ON pokemon_type(pokemon_id);
CREATE INDEX IF NOT EXISTS idx_pokemon_type_type_name ON pokemon_type(type_name);

-- Abilities, replaced wholesale on update
CREATE TABLE IF NOT EXISTS pokemon_ability (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pokemon_id INTEGER NOT NULL REFERENCES pokemon(id) ON DELETE CASCADE,
    ability_name TEXT NOT NULL,
    is_hidden INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_pokemon_ability_pokemon_id ON pokemon_ability(pokemon_id);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
