//! Request Validation
//!
//! Shape checks applied to request bodies before anything reaches the
//! reconciler. Identifier semantics (at least one present) stay in core.

use linkage_core::{Identifiers, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ApiResult;
use crate::types::IdentifyRequest;

/// Local part, `@`, then a dotted domain with a TLD of two or more letters.
static EMAIL_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$").ok()
});

/// Trim a submitted identifier; blank values become absent.
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trait for validating email addresses.
pub trait ValidateEmail {
    /// # Errors
    /// Returns `ValidationError::InvalidFormat` when the value is not a
    /// syntactically valid address.
    fn validate_email(&self, field_name: &str) -> Result<(), ValidationError>;
}

impl ValidateEmail for str {
    fn validate_email(&self, field_name: &str) -> Result<(), ValidationError> {
        let valid = match EMAIL_PATTERN.as_ref() {
            Some(pattern) => pattern.is_match(self),
            None => self.contains('@'),
        };
        if !valid {
            return Err(ValidationError::InvalidFormat {
                field: field_name.to_string(),
                reason: "must be a valid email address".to_string(),
            });
        }
        Ok(())
    }
}

impl ValidateEmail for String {
    fn validate_email(&self, field_name: &str) -> Result<(), ValidationError> {
        self.as_str().validate_email(field_name)
    }
}

impl IdentifyRequest {
    /// Normalize and validate into the reconciler's input.
    ///
    /// Format problems surface as `ValidationError`s; a request with neither
    /// identifier becomes `InvalidRequest` through `Identifiers::new`.
    pub fn into_identifiers(self) -> ApiResult<Identifiers> {
        let email = normalize_optional(self.email);
        let phone_number = normalize_optional(self.phone_number);

        if let Some(email) = &email {
            email.validate_email("email")?;
        }

        Ok(Identifiers::new(email, phone_number)?)
    }
}
