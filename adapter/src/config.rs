//! Adapter configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Adapter configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Upper bound on every store request
    pub timeout: Duration,
    /// Rows requested when a query must be post-processed client-side
    pub max_rows: usize,
    /// Initial state of forward migration on read
    pub migrate_forward: bool,
    /// Initial state of backward migration on read
    pub migrate_backward: bool,
}

impl AdapterConfig {
    /// Load configuration from the process environment.
    ///
    /// Every variable is optional:
    /// - `CAIRN_TIMEOUT_MS`: store request timeout in milliseconds (default 5000)
    /// - `CAIRN_MAX_ROWS`: client-side query row cap (default 10000)
    /// - `CAIRN_MIGRATE_FORWARD`: `true`/`false` (default true)
    /// - `CAIRN_MIGRATE_BACKWARD`: `true`/`false` (default false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout = match lookup("CAIRN_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidTimeout(raw))?,
            None => defaults.timeout,
        };

        let max_rows = match lookup("CAIRN_MAX_ROWS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|rows| *rows > 0)
                .ok_or(ConfigError::InvalidMaxRows(raw))?,
            None => defaults.max_rows,
        };

        let migrate_forward = flag(&lookup, "CAIRN_MIGRATE_FORWARD", defaults.migrate_forward)?;
        let migrate_backward = flag(&lookup, "CAIRN_MIGRATE_BACKWARD", defaults.migrate_backward)?;

        Ok(Self {
            timeout,
            max_rows,
            migrate_forward,
            migrate_backward,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_rows: cairn_engine::query::DEFAULT_MAX_ROWS,
            migrate_forward: true,
            migrate_backward: false,
        }
    }
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name, value: raw }),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid CAIRN_TIMEOUT_MS value: {0}")]
    InvalidTimeout(String),

    #[error("Invalid CAIRN_MAX_ROWS value: {0}")]
    InvalidMaxRows(String),

    #[error("Invalid {name} value: {value}")]
    InvalidFlag { name: &'static str, value: String },
}
