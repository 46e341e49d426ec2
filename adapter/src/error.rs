//! Adapter error types.

use crate::{config::ConfigError, store::StoreError};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Engine(#[from] cairn_engine::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AdapterError {
    /// Whether repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Timeout { .. } => true,
            AdapterError::Store(err) => err.is_transient(),
            AdapterError::Engine(_) | AdapterError::Config(_) => false,
        }
    }
}

impl From<cairn_engine::QueryError> for AdapterError {
    fn from(err: cairn_engine::QueryError) -> Self {
        AdapterError::Engine(err.into())
    }
}

impl From<cairn_engine::MigrationModulesError> for AdapterError {
    fn from(err: cairn_engine::MigrationModulesError) -> Self {
        AdapterError::Engine(err.into())
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
