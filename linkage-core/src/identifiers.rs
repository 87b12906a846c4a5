//! Submitted identifier pair.

use crate::{LinkageError, LinkageResult};
use serde::{Deserialize, Serialize};

/// Prefix of email lock keys.
pub const EMAIL_KEY_PREFIX: &str = "email:";
/// Prefix of phone lock keys.
pub const PHONE_KEY_PREFIX: &str = "phone:";

/// The identifiers carried by one reconciliation request.
///
/// Construction guarantees at least one identifier is present. Blank values
/// count as absent; present values are kept byte-for-byte since matching is
/// exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifiers {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Identifiers {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> LinkageResult<Self> {
        let email = email.filter(|value| !value.trim().is_empty());
        let phone_number = phone_number.filter(|value| !value.trim().is_empty());

        if email.is_none() && phone_number.is_none() {
            return Err(LinkageError::invalid_request(
                "At least one of email or phoneNumber must be provided",
            ));
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        (self.email, self.phone_number)
    }

    /// Lock keys for the serialization boundary, sorted so that every caller
    /// acquires them in the same order.
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .email
            .iter()
            .map(|email| format!("{}{}", EMAIL_KEY_PREFIX, email))
            .chain(
                self.phone_number
                    .iter()
                    .map(|phone| format!("{}{}", PHONE_KEY_PREFIX, phone)),
            )
            .collect();
        keys.sort();
        keys
    }
}
