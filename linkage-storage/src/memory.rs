//! In-memory contact store.
//!
//! Used for tests and for running the service without Postgres
//! (`LINKAGE_STORE=memory`). Contents are lost on drop.

use crate::ContactStore;
use async_trait::async_trait;
use chrono::Utc;
use linkage_core::{
    Contact, ContactId, LinkPrecedence, LinkageError, LinkageResult, NewContact,
    PrecedenceUpdate, StorageError, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, Contact>,
    next_id: i64,
    last_created_at: Option<Timestamp>,
}

impl MemoryState {
    fn allocate(&mut self) -> (ContactId, Timestamp) {
        self.next_id += 1;
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(created_at);
        (ContactId(self.next_id), created_at)
    }

    fn conflicting_identifier(&self, contact: &NewContact) -> Option<String> {
        let email = contact.email.as_deref();
        let phone = contact.phone_number.as_deref();
        self.contacts.values().find_map(|existing| {
            if let Some(email) = email.filter(|e| existing.has_email(e)) {
                return Some(format!("email:{}", email));
            }
            phone
                .filter(|p| existing.has_phone_number(p))
                .map(|p| format!("phone:{}", p))
        })
    }
}

/// Thread-safe in-memory [`ContactStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryContactStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryContactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed contact as-is, bypassing creation rules.
    ///
    /// Lets fixtures lay down history with chosen ids and timestamps. Later
    /// `create` calls continue after the highest seeded id and never go back
    /// in time.
    pub fn seed(&self, contact: Contact) -> LinkageResult<()> {
        let mut state = self.write()?;
        if state.contacts.contains_key(&contact.id) {
            return Err(StorageError::InsertFailed {
                reason: format!("contact {} already exists", contact.id),
            }
            .into());
        }
        state.next_id = state.next_id.max(contact.id.get());
        state.last_created_at = state.last_created_at.max(Some(contact.created_at));
        state.contacts.insert(contact.id, contact);
        Ok(())
    }

    /// Number of stored contacts.
    pub fn len(&self) -> LinkageResult<usize> {
        Ok(self.read()?.contacts.len())
    }

    pub fn is_empty(&self) -> LinkageResult<bool> {
        Ok(self.read()?.contacts.is_empty())
    }

    /// Look up a single contact by id.
    pub fn get(&self, id: ContactId) -> LinkageResult<Option<Contact>> {
        Ok(self.read()?.contacts.get(&id).cloned())
    }

    fn read(&self) -> LinkageResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| LinkageError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> LinkageResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| LinkageError::Storage(StorageError::LockPoisoned))
    }
}

fn validate_new(state: &MemoryState, contact: &NewContact) -> LinkageResult<()> {
    if contact.email.is_none() && contact.phone_number.is_none() {
        return Err(StorageError::InsertFailed {
            reason: "contact must carry an email or a phone number".to_string(),
        }
        .into());
    }

    match (contact.precedence, contact.linked_id) {
        (LinkPrecedence::Primary, None) => {
            if let Some(identifier) = state.conflicting_identifier(contact) {
                return Err(StorageError::UniqueViolation { identifier }.into());
            }
            Ok(())
        }
        (LinkPrecedence::Secondary, Some(linked)) => match state.contacts.get(&linked) {
            Some(target) if target.is_primary() => Ok(()),
            Some(_) => Err(StorageError::StaleLink { id: linked }.into()),
            None => Err(StorageError::NotFound { id: linked }.into()),
        },
        (precedence, linked) => Err(StorageError::InsertFailed {
            reason: format!(
                "{} contact cannot have linked id {:?}",
                precedence, linked
            ),
        }
        .into()),
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        let state = self.read()?;
        Ok(state
            .contacts
            .values()
            .filter(|c| {
                email.is_some_and(|e| c.has_email(e))
                    || phone_number.is_some_and(|p| c.has_phone_number(p))
            })
            .cloned()
            .collect())
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        let state = self.read()?;
        Ok(state
            .contacts
            .values()
            .filter(|c| {
                ids.contains(&c.id) || c.linked_id.is_some_and(|linked| ids.contains(&linked))
            })
            .cloned()
            .collect())
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        let mut state = self.write()?;
        validate_new(&state, &contact)?;

        let (id, created_at) = state.allocate();
        let stored = Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            precedence: contact.precedence,
            linked_id: contact.linked_id,
            created_at,
            updated_at: created_at,
        };
        state.contacts.insert(id, stored.clone());
        tracing::trace!(contact_id = %id, precedence = %stored.precedence, "Contact stored");
        Ok(stored)
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        let mut state = self.write()?;

        for update in updates {
            if !state.contacts.contains_key(&update.id) {
                return Err(StorageError::NotFound { id: update.id }.into());
            }
            if update.precedence == LinkPrecedence::Secondary && update.linked_id.is_none() {
                return Err(StorageError::UpdateFailed {
                    id: update.id,
                    reason: "secondary contact requires a linked id".to_string(),
                }
                .into());
            }
        }

        let now = Utc::now();
        let mut redirects = BTreeMap::new();
        for update in updates {
            if let Some(contact) = state.contacts.get_mut(&update.id) {
                contact.precedence = update.precedence;
                contact.linked_id = update.linked_id;
                contact.updated_at = now.max(contact.created_at);
            }
            if let Some(canonical) = update.linked_id {
                redirects.insert(update.id, canonical);
            }
        }

        // Secondaries written after the caller's read still point at a
        // demoted contact; they follow it to the new canonical record.
        for contact in state.contacts.values_mut() {
            let Some(canonical) = contact.linked_id.and_then(|l| redirects.get(&l)) else {
                continue;
            };
            if *canonical != contact.id {
                contact.linked_id = Some(*canonical);
                contact.updated_at = now.max(contact.created_at);
            }
        }
        Ok(())
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        Ok(self.read()?.contacts.values().cloned().collect())
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        Ok(self.read().is_ok())
    }
}
