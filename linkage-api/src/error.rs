//! Error Types for LINKAGE API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use linkage_core::{ConfigError, LinkageError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Field format is incorrect
    InvalidFormat,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// A concurrent writer kept winning until retries ran out
    ConcurrentModification,

    // ========================================================================
    // Rate Limiting (429)
    // ========================================================================
    /// Request rate limit exceeded
    TooManyRequests,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,

            ErrorCode::ConcurrentModification => StatusCode::CONFLICT,

            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError | ErrorCode::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending field, retry hints)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConcurrentModification, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!("Rate limit exceeded. Retry after {} seconds", secs),
            None => "Rate limit exceeded".to_string(),
        };
        Self::new(ErrorCode::TooManyRequests, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let details = serde_json::json!({ "field": err.field() });
        ApiError::new(ErrorCode::InvalidFormat, err.to_string()).with_details(details)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::UniqueViolation { .. }
            | StorageError::StaleLink { .. }
            | StorageError::TransactionAborted { .. } => {
                tracing::warn!(error = %err, "Reconciliation gave up after write conflicts");
                ApiError::concurrent_modification(
                    "Contact was modified by a concurrent request; retry the request",
                )
            }
            StorageError::Unavailable { .. } => {
                tracing::error!(error = %err, "Contact store unavailable");
                ApiError::service_unavailable("Contact store is unavailable")
            }
            _ => {
                // Log the full error, return a generic message
                tracing::error!(error = %err, "Contact store error");
                ApiError::database_error("Database operation failed")
            }
        }
    }
}

impl From<LinkageError> for ApiError {
    fn from(err: LinkageError) -> Self {
        match err {
            LinkageError::InvalidRequest { reason } => ApiError::invalid_input(reason),
            LinkageError::Storage(storage) => storage.into(),
            LinkageError::InvariantViolation { reason } => {
                tracing::error!(%reason, "Stored contacts violate cluster invariants");
                ApiError::internal_error("Stored contact data is inconsistent")
            }
            LinkageError::Config(config) => {
                tracing::error!(error = %config, "Configuration error");
                ApiError::internal_error("Service is misconfigured")
            }
        }
    }
}

/// Startup configuration failures. Reported before the server accepts
/// requests, so the offending setting is kept in the message.
impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Invalid configuration: {}", err))
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::internal_error(format!("JSON serialization failed: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use linkage_core::ContactId;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidFormat.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ConcurrentModification.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::TooManyRequests.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_linkage_error_mapping() {
        let invalid: ApiError = LinkageError::invalid_request("no identifiers").into();
        assert_eq!(invalid.code, ErrorCode::InvalidInput);

        let conflict: ApiError = LinkageError::from(StorageError::UniqueViolation {
            identifier: "email:a@b.com".to_string(),
        })
        .into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let stale: ApiError = LinkageError::from(StorageError::StaleLink { id: ContactId(2) }).into();
        assert_eq!(stale.code, ErrorCode::ConcurrentModification);

        let aborted: ApiError = LinkageError::from(StorageError::TransactionAborted {
            reason: "deadlock detected".to_string(),
        })
        .into();
        assert_eq!(aborted.status_code(), StatusCode::CONFLICT);

        let down: ApiError = LinkageError::from(StorageError::Unavailable {
            reason: "refused".to_string(),
        })
        .into();
        assert_eq!(down.code, ErrorCode::ServiceUnavailable);

        let failed: ApiError = LinkageError::from(StorageError::TransactionFailed {
            reason: "could not extend file".to_string(),
        })
        .into();
        assert_eq!(failed.code, ErrorCode::DatabaseError);
        assert!(!failed.message.contains("extend file"));

        let missing: ApiError = LinkageError::from(StorageError::NotFound { id: ContactId(9) }).into();
        assert_eq!(missing.code, ErrorCode::DatabaseError);

        let broken: ApiError = LinkageError::invariant_violation("no primary").into();
        assert_eq!(broken.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_config_error_is_internal() {
        let err: ApiError = ConfigError::InvalidValue {
            field: "PORT".to_string(),
            value: "http".to_string(),
            reason: "invalid digit found in string".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("PORT"));
    }

    #[test]
    fn test_validation_error_mapping() {
        let err: ApiError = ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: "missing '@'".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert_eq!(err.details, Some(serde_json::json!({ "field": "email" })));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::too_many_requests(Some(30));
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("TOO_MANY_REQUESTS"));
        assert!(json.contains("30 seconds"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::database_error("Connection failed");
        let display = format!("{}", err);

        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Connection failed"));
    }
}
