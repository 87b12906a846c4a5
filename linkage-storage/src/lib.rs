//! LINKAGE Storage - Contact Store Trait and In-Memory Implementation
//!
//! Defines the persistence contract used by the reconciler. The Postgres
//! implementation lives in linkage-api.

pub mod contact_store;
pub mod memory;

pub use contact_store::ContactStore;
pub use memory::InMemoryContactStore;
