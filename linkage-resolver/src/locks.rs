//! Keyed in-process locks serializing reconciliations that share an
//! identifier.
//!
//! Each submitted identifier maps to one async mutex. A request takes the
//! mutexes for all of its keys in sorted order, so two requests can never
//! wait on each other in a cycle. Entries are counted per holder (waiting or
//! locked) and removed from the table once the last one lets go.

use dashmap::DashMap;
use linkage_core::{Identifiers, LockScope};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key used for every request under [`LockScope::Global`].
pub const GLOBAL_LOCK_KEY: &str = "*";

#[derive(Debug)]
struct LockEntry {
    mutex: Arc<Mutex<()>>,
    holders: usize,
}

/// Lock table shared by every reconciliation in the process.
#[derive(Debug, Clone)]
pub struct IdentifierLocks {
    scope: LockScope,
    table: Arc<DashMap<String, LockEntry>>,
}

impl IdentifierLocks {
    pub fn new(scope: LockScope) -> Self {
        Self {
            scope,
            table: Arc::new(DashMap::new()),
        }
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Keys a request for `identifiers` will take, in acquisition order.
    pub fn keys_for(&self, identifiers: &Identifiers) -> Vec<String> {
        match self.scope {
            LockScope::Identifier => identifiers.lock_keys(),
            LockScope::Global => vec![GLOBAL_LOCK_KEY.to_string()],
        }
    }

    /// Wait for every lock covering `identifiers`.
    ///
    /// Dropping the returned guard releases them. Dropping the future before
    /// it completes releases whatever was already taken.
    pub async fn acquire(&self, identifiers: &Identifiers) -> IdentifierGuard {
        let keys = self.keys_for(identifiers);
        let mut guard = IdentifierGuard {
            table: Arc::clone(&self.table),
            registered: Vec::with_capacity(keys.len()),
            held: Vec::with_capacity(keys.len()),
        };

        for key in keys {
            let mutex = self.register(&key);
            guard.registered.push(key);
            guard.held.push(mutex.lock_owned().await);
        }
        guard
    }

    /// Number of keys currently waited on or held.
    pub fn active_keys(&self) -> usize {
        self.table.len()
    }

    fn register(&self, key: &str) -> Arc<Mutex<()>> {
        let mut entry = self
            .table
            .entry(key.to_string())
            .or_insert_with(|| LockEntry {
                mutex: Arc::new(Mutex::new(())),
                holders: 0,
            });
        entry.holders += 1;
        Arc::clone(&entry.mutex)
    }
}

/// Held locks for one reconciliation.
#[derive(Debug)]
pub struct IdentifierGuard {
    table: Arc<DashMap<String, LockEntry>>,
    registered: Vec<String>,
    held: Vec<OwnedMutexGuard<()>>,
}

impl IdentifierGuard {
    /// Keys covered by this guard, in acquisition order.
    pub fn keys(&self) -> &[String] {
        &self.registered
    }
}

impl Drop for IdentifierGuard {
    fn drop(&mut self) {
        // Unlock before unregistering so waiters never see a removed entry
        // while its mutex is still held.
        self.held.clear();

        for key in self.registered.drain(..) {
            let unused = {
                let Some(mut entry) = self.table.get_mut(&key) else {
                    continue;
                };
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders == 0
            };
            if unused {
                self.table.remove_if(&key, |_, entry| entry.holders == 0);
            }
        }
    }
}
