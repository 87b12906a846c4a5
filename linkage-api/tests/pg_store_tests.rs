//! Postgres contact store tests.
//!
//! Require a reachable database configured through `LINKAGE_DB_*`:
//!   cargo test -p linkage-api --features db-tests --test pg_store_tests
//!
//! Every test uses identifiers unique to the run, so the suite can share
//! a database with other runs.

#![cfg(feature = "db-tests")]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use linkage_api::{DbConfig, PgContactStore};
use linkage_core::{
    Identifiers, LinkageError, LinkageResult, NewContact, PrecedenceUpdate, StorageError,
};
use linkage_resolver::{ReconcileOutcome, Reconciler};
use linkage_storage::ContactStore;
use linkage_test_utils::assertions::assert_cluster_invariants;
use tokio::sync::OnceCell;

/// Concurrent `CREATE TABLE IF NOT EXISTS` can still collide, so the
/// schema is bootstrapped once per test binary.
static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn test_store() -> LinkageResult<PgContactStore> {
    let store = PgContactStore::from_config(&DbConfig::from_env()).map_err(|e| {
        LinkageError::from(StorageError::Unavailable {
            reason: e.to_string(),
        })
    })?;
    SCHEMA.get_or_try_init(|| store.ensure_schema()).await?;
    Ok(store)
}

/// Identifier unique to this test run.
fn unique(label: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", label, nanos)
}

fn email(label: &str) -> String {
    format!("{}@pg.test", unique(label))
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent() -> LinkageResult<()> {
    let store = test_store().await?;
    store.ensure_schema().await?;
    assert!(store.health_check().await?);
    Ok(())
}

#[tokio::test]
async fn test_second_primary_for_identifier_is_unique_violation() -> LinkageResult<()> {
    let store = test_store().await?;
    let shared = email("dup");

    store.create(NewContact::primary(Some(shared.clone()), None)).await?;
    let err = store
        .create(NewContact::primary(Some(shared), Some(unique("p"))))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LinkageError::Storage(StorageError::UniqueViolation { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_secondary_on_demoted_contact_is_stale_link() -> LinkageResult<()> {
    let store = test_store().await?;
    let older = store.create(NewContact::primary(Some(email("old")), None)).await?;
    let newer = store.create(NewContact::primary(Some(email("new")), None)).await?;

    store
        .batch_update_precedence(&[PrecedenceUpdate::link_to(newer.id, older.id)])
        .await?;

    let err = store
        .create(NewContact::secondary(Some(email("late")), None, newer.id))
        .await
        .unwrap_err();
    assert_eq!(err, LinkageError::Storage(StorageError::StaleLink { id: newer.id }));
    Ok(())
}

#[tokio::test]
async fn test_batch_update_carries_secondaries_along() -> LinkageResult<()> {
    let store = test_store().await?;
    let older = store.create(NewContact::primary(Some(email("a")), None)).await?;
    let newer = store.create(NewContact::primary(Some(email("b")), None)).await?;
    let follower = store
        .create(NewContact::secondary(Some(email("c")), None, newer.id))
        .await?;

    store
        .batch_update_precedence(&[PrecedenceUpdate::link_to(newer.id, older.id)])
        .await?;

    let members = store
        .find_by_ids_or_linked_to(&[older.id].into_iter().collect())
        .await?;
    let moved = members
        .iter()
        .find(|c| c.id == follower.id)
        .ok_or_else(|| LinkageError::invariant_violation(format!("{} not moved", follower.id)))?;
    assert_eq!(moved.linked_id, Some(older.id));
    assert_cluster_invariants(&members);
    Ok(())
}

#[tokio::test]
async fn test_reconciler_merges_clusters_in_postgres() -> LinkageResult<()> {
    let store: Arc<dyn ContactStore> = Arc::new(test_store().await?);
    let reconciler = Reconciler::with_defaults(store.clone());
    let (george, phone_a, phone_b) = (email("george"), unique("91"), unique("71"));

    let first = reconciler
        .reconcile(&Identifiers::new(Some(george.clone()), Some(phone_a.clone()))?)
        .await?;
    let second = reconciler
        .reconcile(&Identifiers::new(Some(email("biff")), Some(phone_b.clone()))?)
        .await?;
    let merged = reconciler
        .reconcile(&Identifiers::new(Some(george), Some(phone_b))?)
        .await?;

    assert_eq!(merged.outcome, ReconcileOutcome::Merged);
    assert_eq!(merged.summary.primary_contact_id, first.summary.primary_contact_id);
    assert_eq!(
        merged.summary.secondary_contact_ids,
        vec![second.summary.primary_contact_id]
    );
    assert_eq!(merged.summary.phone_numbers[0], phone_a);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_first_sightings_share_one_primary() -> LinkageResult<()> {
    let store: Arc<dyn ContactStore> = Arc::new(test_store().await?);
    let shared = email("race");

    let mut handles = Vec::new();
    for i in 0..8 {
        let reconciler = Reconciler::with_defaults(store.clone());
        let identifiers = Identifiers::new(Some(shared.clone()), Some(unique(&format!("r{i}"))))?;
        handles.push(tokio::spawn(async move { reconciler.reconcile(&identifiers).await }));
    }

    let mut primaries = Vec::new();
    for handle in handles {
        let result = handle
            .await
            .map_err(|e| LinkageError::invariant_violation(e.to_string()))??;
        primaries.push(result.summary.primary_contact_id);
    }
    primaries.dedup();
    assert_eq!(primaries.len(), 1);
    Ok(())
}
