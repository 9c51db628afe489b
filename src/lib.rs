//! pokemon-sync - Resilient periodic synchronization of PokeAPI records
//!
//! This crate keeps a local SQLite copy of a fixed range of pokemon in step
//! with the upstream API. A cron-driven job runs each pass through a circuit
//! breaker and a retry executor, and cached read views are invalidated after
//! every pass.

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod server;
pub mod service;
pub mod sync;
pub mod telemetry;
