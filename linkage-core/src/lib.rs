//! LINKAGE Core - Contact Model and Cluster Algorithms
//!
//! Data types shared by every other crate, plus the pure steps of
//! reconciliation (primary selection, merge planning, subordinate decision,
//! summary projection). Nothing in here performs I/O.

pub mod cluster;
pub mod config;
pub mod contact;
pub mod error;
pub mod identifiers;
pub mod identity;

pub use cluster::{
    anchor_ids, build_summary, needs_subordinate, plan_merge, select_primary, ClusterSet,
    ContactSummary, PrimarySelection,
};
pub use config::{LockScope, ReconcileConfig};
pub use contact::{
    Contact, LinkPrecedence, LinkPrecedenceParseError, NewContact, PrecedenceUpdate,
};
pub use error::{ConfigError, LinkageError, LinkageResult, StorageError, ValidationError};
pub use identifiers::{Identifiers, EMAIL_KEY_PREFIX, PHONE_KEY_PREFIX};
pub use identity::{ContactId, Timestamp};
