//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use linkage_resolver::Reconciler;
use linkage_storage::ContactStore;

use crate::config::StoreBackend;
use crate::telemetry::InstrumentedStore;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    /// Same store the reconciler writes through, for read-only routes.
    pub store: Arc<dyn ContactStore>,
    pub backend: StoreBackend,
    pub start_time: Instant,
}

impl AppState {
    /// Wrap `store` with latency metrics and share it between the
    /// reconciler and the read-only routes.
    pub fn new<F, E>(
        store: Arc<dyn ContactStore>,
        backend: StoreBackend,
        reconciler_for: F,
    ) -> Result<Self, E>
    where
        F: FnOnce(Arc<dyn ContactStore>) -> Result<Reconciler, E>,
    {
        let store: Arc<dyn ContactStore> = Arc::new(InstrumentedStore::new(store));
        Ok(Self {
            reconciler: reconciler_for(store.clone())?,
            store,
            backend,
            start_time: Instant::now(),
        })
    }

    /// Uninstrumented state over an existing reconciler, for tests.
    pub fn from_reconciler(reconciler: Reconciler, backend: StoreBackend) -> Self {
        Self {
            store: reconciler.store().clone(),
            reconciler,
            backend,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Reconciler, reconciler);
crate::impl_from_ref!(Arc<dyn ContactStore>, store);
crate::impl_from_ref!(StoreBackend, backend);
crate::impl_from_ref!(Instant, start_time);
