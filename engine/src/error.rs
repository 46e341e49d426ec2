//! Error types for the Cairn engine.

use crate::{migration::MigrationModulesError, query::QueryError, FieldName, ModelName};
use thiserror::Error;

/// All possible errors from the Cairn engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Encoding errors
    #[error("cannot encode field '{field}' as string: value is not valid UTF-8")]
    InvalidUtf8 { field: FieldName },

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: FieldName,
        expected: String,
        got: String,
    },

    #[error("malformed stored record: {0}")]
    MalformedRecord(String),

    // Write preconditions
    #[error("entity of model '{0}' has no primary key")]
    MissingPrimaryKey(ModelName),

    #[error("entity of model '{0}' has no schema version")]
    MissingVersion(ModelName),

    #[error("entity of model '{0}' has no causal context")]
    MissingContext(ModelName),

    // Schema lookups
    #[error("model not found: {0}")]
    UnknownModel(ModelName),

    #[error("model '{model}' has no field '{field}'")]
    UnknownField { model: ModelName, field: FieldName },

    // Migration and query
    #[error(transparent)]
    MigrationModules(#[from] Box<MigrationModulesError>),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<MigrationModulesError> for Error {
    fn from(err: MigrationModulesError) -> Self {
        Error::MigrationModules(Box::new(err))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
