//! Configuration management for pokemon-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream data source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Periodic sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Pass-level retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix POKEMON_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Server config from env
        if let Ok(host) = std::env::var("POKEMON_SYNC_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("POKEMON_SYNC_SERVER_PORT") {
            config.server.port = parse_env("POKEMON_SYNC_SERVER_PORT", &port)?;
        }

        // Database config from env
        if let Ok(path) = std::env::var("POKEMON_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        // Cache config from env
        if let Ok(url) = std::env::var("POKEMON_SYNC_REDIS_URL") {
            config.cache.backend = CacheBackend::Redis;
            config.cache.redis = Some(RedisCacheConfig {
                url,
                prefix: default_redis_prefix(),
            });
        }
        if let Ok(ttl) = std::env::var("POKEMON_SYNC_CACHE_TTL_SECS") {
            config.cache.ttl_secs = parse_env("POKEMON_SYNC_CACHE_TTL_SECS", &ttl)?;
        }

        // Source config from env
        if let Ok(url) = std::env::var("POKEMON_SYNC_SOURCE_URL") {
            config.source.base_url = url;
        }
        if let Ok(timeout) = std::env::var("POKEMON_SYNC_SOURCE_TIMEOUT_SECS") {
            config.source.timeout_secs = parse_env("POKEMON_SYNC_SOURCE_TIMEOUT_SECS", &timeout)?;
        }
        if let Ok(retries) = std::env::var("POKEMON_SYNC_SOURCE_MAX_RETRIES") {
            config.source.max_retries = parse_env("POKEMON_SYNC_SOURCE_MAX_RETRIES", &retries)?;
        }

        // Sync config from env
        if let Ok(cadence) = std::env::var("POKEMON_SYNC_CADENCE") {
            config.sync.cadence = cadence;
        }

        // Logging config from env
        if let Ok(level) = std::env::var("POKEMON_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.first_id > self.sync.last_id {
            return Err(ConfigError::InvalidValue(format!(
                "sync.first_id ({}) must not exceed sync.last_id ({})",
                self.sync.first_id, self.sync.last_id
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::InvalidValue(format!(
                "retry.jitter must be within [0, 1], got {}",
                self.retry.jitter
            )));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(format!(
                "retry.multiplier must be at least 1, got {}",
                self.retry.multiplier
            )));
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis.is_none() {
            return Err(ConfigError::MissingRequired(
                "cache.redis.url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "pokemon.db".to_string()
}

/// Which cache implementation to use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local cache
    #[default]
    Memory,
    /// Shared Redis cache
    Redis,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache backend to use
    #[serde(default)]
    pub backend: CacheBackend,

    /// TTL for cached list views in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Redis cache configuration (optional)
    #[serde(default)]
    pub redis: Option<RedisCacheConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl_secs: default_cache_ttl(),
            redis: None,
        }
    }
}

impl CacheConfig {
    /// TTL as a Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

fn default_redis_prefix() -> String {
    "pokemon_api".to_string()
}

/// Upstream source (PokeAPI) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Base URL of the API
    #[serde(default = "default_source_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    /// Extra fetch attempts per identifier after the first one
    #[serde(default = "default_source_max_retries")]
    pub max_retries: u32,

    /// Minimum interval between requests in milliseconds
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Maximum number of concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// User-Agent header sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_url(),
            timeout_secs: default_source_timeout(),
            max_retries: default_source_max_retries(),
            min_interval_ms: 0,
            max_concurrent: default_max_concurrent(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_source_url() -> String {
    "https://pokeapi.co/api/v2".to_string()
}

fn default_source_timeout() -> u64 {
    30
}

fn default_source_max_retries() -> u32 {
    3
}

fn default_max_concurrent() -> usize {
    4
}

fn default_user_agent() -> String {
    concat!("pokemon-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

/// What to do when a trigger fires while the previous pass is still running
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the new trigger
    #[default]
    Skip,
    /// Run passes concurrently
    Allow,
}

/// Periodic sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Scheduler job name
    #[serde(default = "default_job_name")]
    pub job_name: String,

    /// Cron cadence (seconds field first)
    #[serde(default = "default_cadence")]
    pub cadence: String,

    /// First identifier of the synced range (inclusive)
    #[serde(default = "default_first_id")]
    pub first_id: u32,

    /// Last identifier of the synced range (inclusive)
    #[serde(default = "default_last_id")]
    pub last_id: u32,

    /// Overlap policy for scheduled passes
    #[serde(default)]
    pub overlap: OverlapPolicy,

    /// Run one protected pass immediately at startup
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            cadence: default_cadence(),
            first_id: default_first_id(),
            last_id: default_last_id(),
            overlap: OverlapPolicy::default(),
            run_on_startup: false,
        }
    }
}

fn default_job_name() -> String {
    "pokemon-refresh".to_string()
}

fn default_cadence() -> String {
    "0 */15 * * * *".to_string()
}

fn default_first_id() -> u32 {
    1
}

fn default_last_id() -> u32 {
    20
}

/// Retry configuration for whole sync passes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Initial backoff in seconds
    #[serde(default = "default_initial_interval")]
    pub initial_interval_secs: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum backoff in seconds
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    /// Give up once this much time has passed since the first attempt
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,

    /// Randomization factor applied to each interval (0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Optional cap on retries after the first attempt
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval(),
            multiplier: default_multiplier(),
            max_interval_secs: default_max_interval(),
            max_elapsed_secs: default_max_elapsed(),
            jitter: default_jitter(),
            max_retries: None,
        }
    }
}

fn default_initial_interval() -> u64 {
    5
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_interval() -> u64 {
    120
}

fn default_max_elapsed() -> u64 {
    600
}

fn default_jitter() -> f64 {
    0.1
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Breaker name used in logs and notifications
    #[serde(default = "default_breaker_name")]
    pub name: String,

    /// Consecutive failures that trip the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Trial calls allowed while half-open
    #[serde(default = "default_max_half_open")]
    pub max_half_open_requests: u32,

    /// Closed-state window after which counts reset (0 disables)
    #[serde(default = "default_breaker_interval")]
    pub interval_secs: u64,

    /// Open-state cool-down before a trial is allowed
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: default_breaker_name(),
            failure_threshold: default_failure_threshold(),
            max_half_open_requests: default_max_half_open(),
            interval_secs: default_breaker_interval(),
            timeout_secs: default_breaker_timeout(),
        }
    }
}

fn default_breaker_name() -> String {
    "pokemon-sync".to_string()
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_half_open() -> u32 {
    3
}

fn default_breaker_interval() -> u64 {
    60
}

fn default_breaker_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `text`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
