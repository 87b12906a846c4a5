//! The reconciliation pipeline.
//!
//! ```text
//!   acquire locks
//!        │
//!   resolve cluster ── none ──→ create primary ───────────────┐
//!        │                                                    │
//!   select primary → merge batch → subordinate? → summary ←───┘
//! ```
//!
//! The whole pipeline reruns when the store reports a conflict with a
//! concurrent writer or an aborted transaction, up to
//! `ReconcileConfig::max_attempts` runs.

use crate::locks::IdentifierLocks;
use linkage_core::{
    anchor_ids, build_summary, needs_subordinate, plan_merge, select_primary, ClusterSet,
    ContactId, ContactSummary, Identifiers, LinkageError, LinkageResult, NewContact,
    ReconcileConfig,
};
use linkage_storage::ContactStore;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Upper bound on store expansions while closing a cluster. A consistent
/// store always closes after the first.
pub const MAX_EXPANSION_ROUNDS: usize = 4;

/// What a reconciliation did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcileOutcome {
    /// No existing contact matched; a new primary was created.
    CreatedPrimary,
    /// A new identifier was attached to an existing cluster.
    CreatedSecondary,
    /// Existing contacts were re-linked (with or without a new secondary).
    Merged,
    /// Nothing changed.
    Matched,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::CreatedPrimary => "created_primary",
            ReconcileOutcome::CreatedSecondary => "created_secondary",
            ReconcileOutcome::Merged => "merged",
            ReconcileOutcome::Matched => "matched",
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub summary: ContactSummary,
    pub outcome: ReconcileOutcome,
    /// Contact created by the final attempt, if any.
    pub created: Option<ContactId>,
    /// Contacts re-linked by the final attempt's merge batch.
    pub relinked: Vec<ContactId>,
    /// Pipeline runs it took, starting at 1.
    pub attempts: u32,
}

/// Runs reconciliations against an injected store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ContactStore>,
    locks: IdentifierLocks,
    config: ReconcileConfig,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("active_lock_keys", &self.locks.active_keys())
            .finish()
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContactStore>, config: ReconcileConfig) -> LinkageResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            locks: IdentifierLocks::new(config.lock_scope),
            config,
        })
    }

    pub fn with_defaults(store: Arc<dyn ContactStore>) -> Self {
        let config = ReconcileConfig::default();
        Self {
            store,
            locks: IdentifierLocks::new(config.lock_scope),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn locks(&self) -> &IdentifierLocks {
        &self.locks
    }

    /// Reconcile a raw identifier pair.
    ///
    /// Fails with `InvalidRequest` before touching the store when neither
    /// identifier is present.
    pub async fn identify(
        &self,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> LinkageResult<Reconciliation> {
        let identifiers = Identifiers::new(email, phone_number)?;
        self.reconcile(&identifiers).await
    }

    #[tracing::instrument(
        skip_all,
        fields(
            has_email = identifiers.email().is_some(),
            has_phone = identifiers.phone_number().is_some(),
            lock_scope = %self.config.lock_scope,
        )
    )]
    pub async fn reconcile(&self, identifiers: &Identifiers) -> LinkageResult<Reconciliation> {
        let _guard = self.locks.acquire(identifiers).await;

        let mut attempt = 1;
        loop {
            match self.run_pipeline(identifiers).await {
                Ok(mut reconciliation) => {
                    reconciliation.attempts = attempt;
                    tracing::debug!(
                        outcome = %reconciliation.outcome,
                        primary_contact_id = %reconciliation.summary.primary_contact_id,
                        attempts = attempt,
                        "Reconciliation complete"
                    );
                    return Ok(reconciliation);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "Concurrent write conflict; retrying reconciliation"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_pipeline(&self, identifiers: &Identifiers) -> LinkageResult<Reconciliation> {
        let Some(mut set) = self.resolve(identifiers).await? else {
            return self.create_primary(identifiers).await;
        };

        let selection = select_primary(&set)?;
        let canonical = selection.canonical;
        tracing::debug!(
            canonical = %canonical,
            losing = selection.losing.len(),
            cluster_size = set.len(),
            "Primary selected"
        );

        let updates = plan_merge(&set, canonical);
        if !updates.is_empty() {
            self.store.batch_update_precedence(&updates).await?;
            set.apply_updates(&updates);
            tracing::info!(
                canonical = %canonical,
                demoted = selection.losing.len(),
                relinked = updates.len(),
                "Merged clusters"
            );
        }

        let mut created = None;
        if needs_subordinate(&set, identifiers) {
            let (email, phone_number) = identifiers.clone().into_parts();
            let contact = self
                .store
                .create(NewContact::secondary(email, phone_number, canonical))
                .await?;
            tracing::info!(
                contact_id = %contact.id,
                linked_id = %canonical,
                "Created secondary contact"
            );
            created = Some(contact.id);
            set.insert(contact);
        }

        let outcome = match (updates.is_empty(), created.is_some()) {
            (false, _) => ReconcileOutcome::Merged,
            (true, true) => ReconcileOutcome::CreatedSecondary,
            (true, false) => ReconcileOutcome::Matched,
        };

        Ok(Reconciliation {
            summary: build_summary(&set, canonical)?,
            outcome,
            created,
            relinked: updates.into_iter().map(|u| u.id).collect(),
            attempts: 1,
        })
    }

    async fn create_primary(&self, identifiers: &Identifiers) -> LinkageResult<Reconciliation> {
        let (email, phone_number) = identifiers.clone().into_parts();
        let contact = self
            .store
            .create(NewContact::primary(email, phone_number))
            .await?;
        tracing::info!(contact_id = %contact.id, "Created primary contact");

        let canonical = contact.id;
        let set: ClusterSet = std::iter::once(contact).collect();
        Ok(Reconciliation {
            summary: build_summary(&set, canonical)?,
            outcome: ReconcileOutcome::CreatedPrimary,
            created: Some(canonical),
            relinked: Vec::new(),
            attempts: 1,
        })
    }

    /// Direct matches expanded to every contact sharing a canonical record
    /// with them. `None` when nothing matches.
    async fn resolve(&self, identifiers: &Identifiers) -> LinkageResult<Option<ClusterSet>> {
        let matches = self
            .store
            .find_matching(identifiers.email(), identifiers.phone_number())
            .await?;
        if matches.is_empty() {
            tracing::debug!("No matching contacts");
            return Ok(None);
        }

        let mut anchors = anchor_ids(&matches);
        for round in 1..=MAX_EXPANSION_ROUNDS {
            let set: ClusterSet = self
                .store
                .find_by_ids_or_linked_to(&anchors)
                .await?
                .into_iter()
                .collect();

            let dangling: BTreeSet<ContactId> = set
                .iter()
                .filter_map(|c| c.linked_id)
                .filter(|linked| set.get(*linked).is_none())
                .collect();

            if dangling.is_empty() {
                tracing::debug!(
                    matched = matches.len(),
                    cluster_size = set.len(),
                    rounds = round,
                    "Cluster resolved"
                );
                return Ok(Some(set));
            }

            tracing::warn!(
                round,
                dangling = dangling.len(),
                "Contacts linked outside the resolved set; expanding again"
            );
            anchors.extend(set.iter().map(|c| c.id));
            anchors.extend(dangling);
        }

        Err(LinkageError::invariant_violation(format!(
            "cluster did not close after {} expansion rounds",
            MAX_EXPANSION_ROUNDS
        )))
    }
}
