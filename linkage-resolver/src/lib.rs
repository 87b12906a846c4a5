//! LINKAGE Resolver - Identity Reconciliation
//!
//! Runs the reconciliation pipeline (resolve, select, merge, extend,
//! summarize) against a [`linkage_storage::ContactStore`], serialized per
//! identifier by [`IdentifierLocks`].

pub mod locks;
pub mod reconciler;

pub use locks::{IdentifierGuard, IdentifierLocks, GLOBAL_LOCK_KEY};
pub use reconciler::{ReconcileOutcome, Reconciler, Reconciliation, MAX_EXPANSION_ROUNDS};
