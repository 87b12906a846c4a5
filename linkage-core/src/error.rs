//! Error types for LINKAGE operations

use crate::ContactId;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query {operation} failed: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Insert failed: {reason}")]
    InsertFailed { reason: String },

    #[error("Update failed for contact {id}: {reason}")]
    UpdateFailed { id: ContactId, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Unique constraint violated on {identifier}")]
    UniqueViolation { identifier: String },

    /// A secondary was about to be linked to a contact that has since been
    /// demoted by a concurrent merge.
    #[error("Linked contact {id} is no longer a primary")]
    StaleLink { id: ContactId },

    /// The database aborted the transaction (deadlock or serialization
    /// failure). Nothing was written.
    #[error("Transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    #[error("Contact not found: {id}")]
    NotFound { id: ContactId },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Request validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid format for {field}: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            ValidationError::InvalidFormat { field, .. } => field,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all LINKAGE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkageError {
    /// Neither identifier was supplied. Raised before any store access.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The store holds data the algorithm cannot reconcile (for example a
    /// cluster without a primary record). Not repaired automatically.
    #[error("Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LinkageError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn invariant_violation(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// Whether the whole reconciliation pipeline may be re-run. True for
    /// conflicts with a concurrent writer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkageError::Storage(
                StorageError::UniqueViolation { .. }
                    | StorageError::StaleLink { .. }
                    | StorageError::TransactionAborted { .. }
            )
        )
    }
}

impl From<ValidationError> for LinkageError {
    fn from(err: ValidationError) -> Self {
        LinkageError::InvalidRequest {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for LINKAGE operations.
pub type LinkageResult<T> = Result<T, LinkageError>;

// =============================================================================
// TESTS
// =============================================================================
