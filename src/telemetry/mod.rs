//! Logging initialisation for pokemon-sync
//!
//! Installs a `tracing` subscriber whose level and output format come from
//! [`LoggingConfig`]. `RUST_LOG`, when set, takes precedence over the
//! configured level.

use crate::config::LoggingConfig;
use crate::error::TelemetryError;
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable text
    Text,
}

impl LogFormat {
    /// Parse a format name, falling back to JSON
    pub fn parse(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "text" | "pretty" | "plain" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Map a configured level name to a filter, defaulting to INFO
pub fn parse_level(log_level: &str) -> LevelFilter {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    LevelFilter::from_level(level)
}

/// Initialize the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(&config.level).into())
        .from_env_lossy();

    match LogFormat::parse(&config.format) {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    }
    .map_err(|e| TelemetryError::Init(e.to_string()))
}
