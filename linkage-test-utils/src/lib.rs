//! LINKAGE Test Utilities
//!
//! Shared test infrastructure for the LINKAGE workspace:
//! - Proptest generators for identifiers and request sequences
//! - Contact fixtures and pre-seeded stores
//! - Store wrappers that count calls or inject failures
//! - Assertions for the cluster invariants

// Re-export the in-memory store from its source crate
pub use linkage_storage::{ContactStore, InMemoryContactStore};

// Re-export core types for convenience
pub use linkage_core::{
    ClusterSet, Contact, ContactId, ContactSummary, LinkPrecedence, LinkageError, LinkageResult,
    NewContact, PrecedenceUpdate, StorageError, Timestamp,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for reconciliation inputs.
    //!
    //! Pools are deliberately tiny so that random sequences collide on
    //! identifiers and exercise merges.

    use super::*;
    use proptest::prelude::*;

    /// An email from a small pool.
    pub fn arb_email() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com"])
            .prop_map(str::to_string)
    }

    /// A phone number from a small pool.
    pub fn arb_phone_number() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["111", "222", "333", "444", "555"]).prop_map(str::to_string)
    }

    /// An identifier pair with at least one side present.
    pub fn arb_identifier_pair() -> impl Strategy<Value = (Option<String>, Option<String>)> {
        prop_oneof![
            (arb_email(), arb_phone_number()).prop_map(|(e, p)| (Some(e), Some(p))),
            arb_email().prop_map(|e| (Some(e), None)),
            arb_phone_number().prop_map(|p| (None, Some(p))),
        ]
    }

    /// A sequence of identifier pairs to reconcile in order.
    pub fn arb_request_sequence(
        max_len: usize,
    ) -> impl Strategy<Value = Vec<(Option<String>, Option<String>)>> {
        prop::collection::vec(arb_identifier_pair(), 1..=max_len.max(1))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built contacts and stores.

    use super::*;

    /// Midnight UTC on the given date.
    pub fn timestamp(year: i32, month: u32, day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn primary_contact(
        id: i64,
        created_at: Timestamp,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Contact {
        Contact {
            id: ContactId(id),
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            precedence: LinkPrecedence::Primary,
            linked_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn secondary_contact(
        id: i64,
        created_at: Timestamp,
        email: Option<&str>,
        phone_number: Option<&str>,
        linked_id: i64,
    ) -> Contact {
        Contact {
            precedence: LinkPrecedence::Secondary,
            linked_id: Some(ContactId(linked_id)),
            ..primary_contact(id, created_at, email, phone_number)
        }
    }

    /// In-memory store holding exactly `contacts`.
    pub fn seeded_store(contacts: impl IntoIterator<Item = Contact>) -> InMemoryContactStore {
        let store = InMemoryContactStore::new();
        for contact in contacts {
            let id = contact.id;
            if let Err(err) = store.seed(contact) {
                panic!("failed to seed contact {}: {}", id, err);
            }
        }
        store
    }

    /// Two unrelated primaries:
    /// - id 1, 2020-01-01, `a@b.com` / `111`
    /// - id 2, 2021-01-01, `b@b.com` / `222`
    pub fn two_cluster_store() -> InMemoryContactStore {
        seeded_store([
            primary_contact(1, timestamp(2020, 1, 1), Some("a@b.com"), Some("111")),
            primary_contact(2, timestamp(2021, 1, 1), Some("b@b.com"), Some("222")),
        ])
    }
}

// ============================================================================
// STORE WRAPPERS
// ============================================================================

/// Contact store operations, for counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    FindMatching,
    FindByIdsOrLinkedTo,
    Create,
    BatchUpdatePrecedence,
    ListAll,
    HealthCheck,
}

/// Forwards to an inner store and counts every call.
#[derive(Clone)]
pub struct CountingStore {
    inner: Arc<dyn ContactStore>,
    counts: Arc<Mutex<HashMap<StoreOperation, usize>>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn ContactStore>) -> Self {
        Self {
            inner,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn calls(&self, operation: StoreOperation) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.get(&operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.values().sum()
    }

    fn record(&self, operation: StoreOperation) {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        *counts.entry(operation).or_insert(0) += 1;
    }
}

#[async_trait]
impl ContactStore for CountingStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        self.record(StoreOperation::FindMatching);
        self.inner.find_matching(email, phone_number).await
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        self.record(StoreOperation::FindByIdsOrLinkedTo);
        self.inner.find_by_ids_or_linked_to(ids).await
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        self.record(StoreOperation::Create);
        self.inner.create(contact).await
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        self.record(StoreOperation::BatchUpdatePrecedence);
        self.inner.batch_update_precedence(updates).await
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        self.record(StoreOperation::ListAll);
        self.inner.list_all().await
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        self.record(StoreOperation::HealthCheck);
        self.inner.health_check().await
    }
}

#[derive(Debug, Clone)]
struct PlannedFailure {
    error: StorageError,
    remaining: Option<usize>,
}

/// Forwards to an inner store, failing chosen operations on demand.
#[derive(Clone)]
pub struct FailingStore {
    inner: Arc<dyn ContactStore>,
    failures: Arc<Mutex<HashMap<StoreOperation, PlannedFailure>>>,
}

impl FailingStore {
    pub fn new(inner: Arc<dyn ContactStore>) -> Self {
        Self {
            inner,
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fail every call to `operation` with `error`.
    pub fn fail_always(self, operation: StoreOperation, error: StorageError) -> Self {
        self.plan(operation, error, None)
    }

    /// Fail the next `times` calls to `operation`, then forward again.
    pub fn fail_times(self, operation: StoreOperation, error: StorageError, times: usize) -> Self {
        self.plan(operation, error, Some(times))
    }

    fn plan(self, operation: StoreOperation, error: StorageError, remaining: Option<usize>) -> Self {
        {
            let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
            failures.insert(operation, PlannedFailure { error, remaining });
        }
        self
    }

    fn check(&self, operation: StoreOperation) -> LinkageResult<()> {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let Some(planned) = failures.get_mut(&operation) else {
            return Ok(());
        };
        match planned.remaining {
            None => Err(planned.error.clone().into()),
            Some(0) => Ok(()),
            Some(n) => {
                planned.remaining = Some(n - 1);
                Err(planned.error.clone().into())
            }
        }
    }
}

#[async_trait]
impl ContactStore for FailingStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        self.check(StoreOperation::FindMatching)?;
        self.inner.find_matching(email, phone_number).await
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        self.check(StoreOperation::FindByIdsOrLinkedTo)?;
        self.inner.find_by_ids_or_linked_to(ids).await
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        self.check(StoreOperation::Create)?;
        self.inner.create(contact).await
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        self.check(StoreOperation::BatchUpdatePrecedence)?;
        self.inner.batch_update_precedence(updates).await
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        self.check(StoreOperation::ListAll)?;
        self.inner.list_all().await
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        self.check(StoreOperation::HealthCheck)?;
        self.inner.health_check().await
    }
}

/// Simulates another process writing between this process's read and its
/// first `create`: the rival contact is created in the inner store right
/// before the first create call is forwarded.
#[derive(Clone)]
pub struct RivalWriterStore {
    inner: Arc<dyn ContactStore>,
    rival: Arc<Mutex<Option<NewContact>>>,
    creates: Arc<AtomicUsize>,
}

impl RivalWriterStore {
    pub fn new(inner: Arc<dyn ContactStore>, rival: NewContact) -> Self {
        Self {
            inner,
            rival: Arc::new(Mutex::new(Some(rival))),
            creates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates forwarded on behalf of the caller (the rival excluded).
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactStore for RivalWriterStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        self.inner.find_matching(email, phone_number).await
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        self.inner.find_by_ids_or_linked_to(ids).await
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        let rival = self.rival.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(rival) = rival {
            self.inner.create(rival).await?;
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(contact).await
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        self.inner.batch_update_precedence(updates).await
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        self.inner.list_all().await
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        self.inner.health_check().await
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for LINKAGE-specific validation.

    use super::*;

    /// Assert that a LinkageResult is an InvalidRequest error.
    #[track_caller]
    pub fn assert_invalid_request<T: std::fmt::Debug>(result: &LinkageResult<T>) {
        match result {
            Err(LinkageError::InvalidRequest { .. }) => {}
            other => panic!("Expected InvalidRequest error, got: {:?}", other),
        }
    }

    /// Assert that a LinkageResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &LinkageResult<T>) {
        match result {
            Err(LinkageError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a LinkageResult is an InvariantViolation error.
    #[track_caller]
    pub fn assert_invariant_violation<T: std::fmt::Debug>(result: &LinkageResult<T>) {
        match result {
            Err(LinkageError::InvariantViolation { .. }) => {}
            other => panic!("Expected InvariantViolation error, got: {:?}", other),
        }
    }

    /// Assert every structural invariant over the full contents of a store:
    ///
    /// - each contact carries at least one identifier
    /// - primaries have no linked id
    /// - secondaries link directly to an existing primary
    /// - each cluster's primary is its oldest member
    /// - no identifier appears in two clusters
    #[track_caller]
    pub fn assert_cluster_invariants(contacts: &[Contact]) {
        let by_id: HashMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();

        for contact in contacts {
            assert!(
                contact.email.is_some() || contact.phone_number.is_some(),
                "contact {} has no identifier",
                contact.id
            );
            match contact.precedence {
                LinkPrecedence::Primary => assert!(
                    contact.linked_id.is_none(),
                    "primary {} has linked id {:?}",
                    contact.id,
                    contact.linked_id
                ),
                LinkPrecedence::Secondary => {
                    let linked = contact
                        .linked_id
                        .unwrap_or_else(|| panic!("secondary {} has no linked id", contact.id));
                    let target = by_id
                        .get(&linked)
                        .unwrap_or_else(|| panic!("secondary {} links to missing {}", contact.id, linked));
                    assert!(
                        target.is_primary(),
                        "secondary {} links to non-primary {}",
                        contact.id,
                        linked
                    );
                    assert!(
                        target.seniority() < contact.seniority(),
                        "secondary {} is older than its primary {}",
                        contact.id,
                        linked
                    );
                }
            }
        }

        let mut owner: HashMap<String, ContactId> = HashMap::new();
        for contact in contacts {
            let cluster = contact.anchor();
            let keys = contact
                .email
                .iter()
                .map(|e| format!("email:{}", e))
                .chain(contact.phone_number.iter().map(|p| format!("phone:{}", p)));
            for key in keys {
                let existing = *owner.entry(key.clone()).or_insert(cluster);
                assert_eq!(
                    existing, cluster,
                    "{} appears in clusters {} and {}",
                    key, existing, cluster
                );
            }
        }
    }

    /// Assert that `summary` describes exactly the cluster it names in
    /// `contacts`.
    #[track_caller]
    pub fn assert_summary_matches_store(summary: &ContactSummary, contacts: &[Contact]) {
        let canonical = summary.primary_contact_id;
        let members: Vec<&Contact> = contacts.iter().filter(|c| c.anchor() == canonical).collect();
        assert!(
            members.iter().any(|c| c.id == canonical && c.is_primary()),
            "summary primary {} is not a stored primary",
            canonical
        );

        let emails: BTreeSet<&str> = members.iter().filter_map(|c| c.email.as_deref()).collect();
        let summary_emails: BTreeSet<&str> = summary.emails.iter().map(String::as_str).collect();
        assert_eq!(summary_emails, emails, "emails differ for cluster {}", canonical);
        assert_eq!(summary.emails.len(), emails.len(), "duplicate emails in summary");

        let phones: BTreeSet<&str> = members
            .iter()
            .filter_map(|c| c.phone_number.as_deref())
            .collect();
        let summary_phones: BTreeSet<&str> =
            summary.phone_numbers.iter().map(String::as_str).collect();
        assert_eq!(summary_phones, phones, "phone numbers differ for cluster {}", canonical);
        assert_eq!(
            summary.phone_numbers.len(),
            phones.len(),
            "duplicate phone numbers in summary"
        );

        let secondaries: BTreeSet<ContactId> = members
            .iter()
            .filter(|c| !c.is_primary())
            .map(|c| c.id)
            .collect();
        let summary_secondaries: BTreeSet<ContactId> =
            summary.secondary_contact_ids.iter().copied().collect();
        assert_eq!(
            summary_secondaries, secondaries,
            "secondary ids differ for cluster {}",
            canonical
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
