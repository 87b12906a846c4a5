//! Cluster arena and the pure reconciliation steps.
//!
//! Everything here works on an in-memory [`ClusterSet`]; fetching and
//! persisting records is the resolver's job. The steps, in pipeline order:
//!
//! ```text
//!   matches ──anchor_ids──→ ids ──(store expand)──→ ClusterSet
//!                                                     │
//!                      select_primary ←───────────────┘
//!                            │
//!                       plan_merge ──→ Vec<PrecedenceUpdate>
//!                            │
//!                    needs_subordinate ──→ bool
//!                            │
//!                      build_summary ──→ ContactSummary
//! ```

use crate::{
    Contact, ContactId, Identifiers, LinkPrecedence, LinkageError, LinkageResult,
    PrecedenceUpdate,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ============================================================================
// CLUSTER SET
// ============================================================================

/// Working set of related contacts, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSet {
    contacts: BTreeMap<ContactId, Contact>,
}

impl ClusterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, contact: Contact) {
        self.contacts.insert(contact.id, contact);
    }

    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.contacts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Contacts in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values().filter(|c| c.is_primary())
    }

    /// Contacts sorted oldest first by `(created_at, id)`.
    pub fn in_creation_order(&self) -> Vec<&Contact> {
        let mut ordered: Vec<&Contact> = self.contacts.values().collect();
        ordered.sort_by_key(|c| c.seniority());
        ordered
    }

    pub fn contains_email(&self, email: &str) -> bool {
        self.contacts.values().any(|c| c.has_email(email))
    }

    pub fn contains_phone_number(&self, phone_number: &str) -> bool {
        self.contacts.values().any(|c| c.has_phone_number(phone_number))
    }

    /// Mirror a committed precedence batch into the working set.
    pub fn apply_updates(&mut self, updates: &[PrecedenceUpdate]) {
        for update in updates {
            if let Some(contact) = self.contacts.get_mut(&update.id) {
                contact.precedence = update.precedence;
                contact.linked_id = update.linked_id;
            }
        }
    }
}

impl FromIterator<Contact> for ClusterSet {
    fn from_iter<I: IntoIterator<Item = Contact>>(iter: I) -> Self {
        Self {
            contacts: iter.into_iter().map(|c| (c.id, c)).collect(),
        }
    }
}

impl IntoIterator for ClusterSet {
    type Item = Contact;
    type IntoIter = std::collections::btree_map::IntoValues<ContactId, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.contacts.into_values()
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Ids to expand a direct match set from: each matched id, plus the linked
/// canonical id of every matched secondary.
pub fn anchor_ids<'a, I>(matches: I) -> BTreeSet<ContactId>
where
    I: IntoIterator<Item = &'a Contact>,
{
    let mut anchors = BTreeSet::new();
    for contact in matches {
        anchors.insert(contact.id);
        if let Some(linked) = contact.linked_id {
            anchors.insert(linked);
        }
    }
    anchors
}

// ============================================================================
// PRIMARY SELECTION
// ============================================================================

/// Outcome of primary selection over a resolved set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySelection {
    pub canonical: ContactId,
    /// Other primaries in the set, oldest first. Each must be demoted.
    pub losing: Vec<ContactId>,
}

impl PrimarySelection {
    pub fn is_merge(&self) -> bool {
        !self.losing.is_empty()
    }
}

/// Pick the oldest primary of the set as canonical.
pub fn select_primary(set: &ClusterSet) -> LinkageResult<PrimarySelection> {
    let mut primaries: Vec<&Contact> = set.primaries().collect();
    primaries.sort_by_key(|c| c.seniority());

    let mut ids = primaries.into_iter().map(|c| c.id);
    let canonical = ids.next().ok_or_else(|| {
        let members: Vec<String> = set.iter().map(|c| c.id.to_string()).collect();
        LinkageError::invariant_violation(format!(
            "resolved set [{}] has no primary contact",
            members.join(", ")
        ))
    })?;

    Ok(PrimarySelection {
        canonical,
        losing: ids.collect(),
    })
}

// ============================================================================
// MERGE PLANNING
// ============================================================================

/// Updates that leave every non-canonical contact in the set as a secondary
/// pointing directly at `canonical`.
///
/// Covers the losing primaries and any secondary still linked elsewhere.
/// Contacts that already satisfy the shape are skipped, so the result is
/// empty for an already-consistent cluster.
pub fn plan_merge(set: &ClusterSet, canonical: ContactId) -> Vec<PrecedenceUpdate> {
    set.in_creation_order()
        .into_iter()
        .filter(|c| c.id != canonical)
        .filter(|c| c.precedence != LinkPrecedence::Secondary || c.linked_id != Some(canonical))
        .map(|c| PrecedenceUpdate::link_to(c.id, canonical))
        .collect()
}

// ============================================================================
// SUBORDINATE DECISION
// ============================================================================

/// Whether the submitted pair carries an identifier the cluster has not seen.
pub fn needs_subordinate(set: &ClusterSet, identifiers: &Identifiers) -> bool {
    let has_email = identifiers
        .email()
        .map_or(true, |email| set.contains_email(email));
    let has_phone = identifiers
        .phone_number()
        .map_or(true, |phone| set.contains_phone_number(phone));
    !(has_email && has_phone)
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Consolidated view of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub primary_contact_id: ContactId,
    /// Distinct emails, canonical first, then oldest first.
    pub emails: Vec<String>,
    /// Distinct phone numbers, canonical first, then oldest first.
    pub phone_numbers: Vec<String>,
    /// Secondary ids, oldest first.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Project a reconciled set into its summary.
pub fn build_summary(set: &ClusterSet, canonical: ContactId) -> LinkageResult<ContactSummary> {
    let primary = set.get(canonical).ok_or_else(|| {
        LinkageError::invariant_violation(format!(
            "canonical contact {} missing from resolved set",
            canonical
        ))
    })?;

    let ordered = set.in_creation_order();

    let emails = distinct_in_order(
        primary.email.as_deref(),
        ordered.iter().copied().filter_map(|c| c.email.as_deref()),
    );
    let phone_numbers = distinct_in_order(
        primary.phone_number.as_deref(),
        ordered.iter().copied().filter_map(|c| c.phone_number.as_deref()),
    );

    let secondary_contact_ids = ordered
        .iter()
        .filter(|c| c.precedence == LinkPrecedence::Secondary && c.id != canonical)
        .map(|c| c.id)
        .collect();

    Ok(ContactSummary {
        primary_contact_id: canonical,
        emails,
        phone_numbers,
        secondary_contact_ids,
    })
}

fn distinct_in_order<'a>(
    first: Option<&'a str>,
    rest: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(rest)
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
