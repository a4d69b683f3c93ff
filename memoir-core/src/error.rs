//! Error types for memoir operations

use thiserror::Error;

/// Key derivation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The entity has not been persisted yet, so it has no identity to key on.
    /// Callers treat this as "not cacheable", never as a failure.
    #[error("Entity of type {entity_type} has no identity yet")]
    Unidentified { entity_type: String },

    #[error("Argument {name} could not be encoded: {reason}")]
    Argument { name: String, reason: String },
}

/// Shared cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Deserialization failed for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all memoir errors.
#[derive(Debug, Clone, Error)]
pub enum MemoirError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl MemoirError {
    /// True when the error only means "this entity cannot be cached yet".
    pub fn is_unidentified(&self) -> bool {
        matches!(self, MemoirError::Key(KeyError::Unidentified { .. }))
    }
}

/// Result type alias for memoir operations.
pub type MemoirResult<T> = Result<T, MemoirError>;

// =============================================================================
// TESTS
// =============================================================================
