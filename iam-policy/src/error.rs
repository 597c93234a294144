use crate::validation::ValidationErrors;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the policy service.
///
/// Storage and integrity failures are deliberately opaque here; their details
/// are handed to the configured `ErrorObserver` instead.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid request: {0}")]
    Validation(ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resource freshness validation failed")]
    Conflict,

    #[error("Unauthenticated: unable to resolve caller")]
    Unauthenticated,

    #[error("Storage error")]
    Storage,

    #[error("Stored policy data is inconsistent")]
    DataIntegrity,

    #[error("Invalid role catalog: {0}")]
    InvalidRoleCatalog(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ValidationErrors> for PolicyError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

/// Failures at the binding storage boundary
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid binding row: {0}")]
    InvalidRow(String),
}

/// Inconsistencies found in stored binding rows
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("binding {binding_index} on '{resource}' mixes roles '{expected}' and '{found}'")]
    ConflictingRoles {
        resource: String,
        binding_index: i64,
        expected: String,
        found: String,
    },

    #[error("binding on '{resource}' references unknown role '{role}'")]
    UnknownRole { resource: String, role: String },
}

pub type Result<T> = std::result::Result<T, PolicyError>;
