//! Contact entity and precedence.
//!
//! A contact is either the canonical (primary) record of its cluster or a
//! secondary record pointing directly at that canonical record.
//!
//! ```text
//!   Primary ──── demote (merge) ──→ Secondary
//!      ↑                                │
//!      └──────────── never ─────────────┘
//! ```

use crate::{ContactId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LINK PRECEDENCE
// ============================================================================

/// Position of a contact within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical record of the cluster
    Primary,
    /// Subordinate record linked to the canonical record
    Secondary,
}

impl LinkPrecedence {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, LinkPrecedenceParseError> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(LinkPrecedence::Primary),
            "secondary" => Ok(LinkPrecedence::Secondary),
            _ => Err(LinkPrecedenceParseError(s.to_string())),
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for LinkPrecedence {
    type Err = LinkPrecedenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid precedence string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPrecedenceParseError(pub String);

impl fmt::Display for LinkPrecedenceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid link precedence: {}", self.0)
    }
}

impl std::error::Error for LinkPrecedenceParseError {}

// ============================================================================
// CONTACT
// ============================================================================

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub precedence: LinkPrecedence,
    /// Canonical record of the cluster. Set iff `precedence` is Secondary.
    pub linked_id: Option<ContactId>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.precedence == LinkPrecedence::Primary
    }

    /// Key used for every "oldest wins" decision: creation time, then id.
    pub fn seniority(&self) -> (Timestamp, ContactId) {
        (self.created_at, self.id)
    }

    /// The canonical record this contact belongs to, as far as the record
    /// itself knows: its own id for a primary, `linked_id` for a secondary.
    pub fn anchor(&self) -> ContactId {
        match self.precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.email.as_deref() == Some(email)
    }

    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.phone_number.as_deref() == Some(phone_number)
    }
}

/// Creation payload; the store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// First sighting of an identifier pair.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// New identifier observed inside an existing cluster.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        linked_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            precedence: LinkPrecedence::Secondary,
            linked_id: Some(linked_id),
        }
    }
}

/// One row of an atomic precedence batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedenceUpdate {
    pub id: ContactId,
    pub precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl PrecedenceUpdate {
    /// Re-point `id` at `canonical` as a secondary.
    pub fn link_to(id: ContactId, canonical: ContactId) -> Self {
        Self {
            id,
            precedence: LinkPrecedence::Secondary,
            linked_id: Some(canonical),
        }
    }
}
