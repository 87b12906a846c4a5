//! Contact store wrapper that records per-operation latency.

use async_trait::async_trait;
use linkage_core::{Contact, ContactId, LinkageResult, NewContact, PrecedenceUpdate};
use linkage_storage::ContactStore;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use super::metrics::METRICS;

/// Times every call to the inner store and reports it to [`METRICS`].
#[derive(Clone)]
pub struct InstrumentedStore {
    inner: Arc<dyn ContactStore>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn ContactStore>) -> Self {
        Self { inner }
    }

    async fn timed<T, F>(&self, operation: &'static str, call: F) -> LinkageResult<T>
    where
        F: Future<Output = LinkageResult<T>>,
    {
        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed().as_secs_f64();

        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_store_operation(operation, result.is_ok(), elapsed);
        }
        if let Err(err) = &result {
            tracing::debug!(operation, error = %err, "Contact store operation failed");
        }
        result
    }
}

#[async_trait]
impl ContactStore for InstrumentedStore {
    async fn find_matching(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> LinkageResult<Vec<Contact>> {
        self.timed("find_matching", self.inner.find_matching(email, phone_number))
            .await
    }

    async fn find_by_ids_or_linked_to(
        &self,
        ids: &BTreeSet<ContactId>,
    ) -> LinkageResult<Vec<Contact>> {
        self.timed(
            "find_by_ids_or_linked_to",
            self.inner.find_by_ids_or_linked_to(ids),
        )
        .await
    }

    async fn create(&self, contact: NewContact) -> LinkageResult<Contact> {
        self.timed("create", self.inner.create(contact)).await
    }

    async fn batch_update_precedence(&self, updates: &[PrecedenceUpdate]) -> LinkageResult<()> {
        self.timed(
            "batch_update_precedence",
            self.inner.batch_update_precedence(updates),
        )
        .await
    }

    async fn list_all(&self) -> LinkageResult<Vec<Contact>> {
        self.timed("list_all", self.inner.list_all()).await
    }

    async fn health_check(&self) -> LinkageResult<bool> {
        self.timed("health_check", self.inner.health_check()).await
    }
}
