//! Async contact store trait.
//!
//! The reconciler only ever talks to persistence through this trait, so the
//! Postgres store, the in-memory store and test wrappers are interchangeable.

use async_trait::async_trait;
use linkage_core::{Contact, ContactId, LinkageResult, NewContact, PrecedenceUpdate};
use std::collections::BTreeSet;

/// Durable record of contacts.
///
/// Implementations must hand out ids monotonically with non-decreasing
/// `created_at`, and must reject creating a primary whose email or phone
/// number is already held by a stored contact with
/// `StorageError::UniqueViolation`.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts whose email equals `email` OR whose phone number equals
    /// `phone_number`. An absent identifier contributes no clause; with both
    /// absent the result is empty.
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>>;

    /// Contacts whose id is in `ids` OR whose linked id is in `ids`.
    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>>;

    /// Insert a contact, assigning id and timestamps.
    async fn create(&self, contact: NewContact) -> LinkageResult<Contact>;

    /// Apply every update or none of them.
    ///
    /// A contact still linked to a contact this batch re-links is moved to
    /// the same target, so secondaries written concurrently never end up
    /// pointing at another secondary.
    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()>;

    /// Every stored contact ordered by id.
    async fn list_all(&self) -> LinkageResult<Vec<Contact>>;

    /// Whether the backing store is reachable.
    async fn health_check(&self) -> LinkageResult<bool>;
}
