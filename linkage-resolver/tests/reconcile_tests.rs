//! End-to-end reconciliation tests against the in-memory store.

use linkage_core::{LockScope, ReconcileConfig};
use linkage_resolver::{ReconcileOutcome, Reconciler};
use linkage_test_utils::assertions::*;
use linkage_test_utils::fixtures::*;
use linkage_test_utils::{
    ContactId, ContactStore, CountingStore, FailingStore, InMemoryContactStore, LinkPrecedence,
    LinkageError, LinkageResult, NewContact, RivalWriterStore, StorageError, StoreOperation,
};
use std::sync::Arc;

fn some(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn reconciler_for(store: &InMemoryContactStore) -> Reconciler {
    Reconciler::with_defaults(Arc::new(store.clone()))
}

#[tokio::test]
async fn test_no_match_creates_single_primary() -> LinkageResult<()> {
    let store = InMemoryContactStore::new();
    let result = reconciler_for(&store)
        .identify(some("a@b.com"), some("111"))
        .await?;

    let contacts = store.list_all().await?;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].precedence, LinkPrecedence::Primary);
    assert_eq!(result.summary.primary_contact_id, contacts[0].id);
    assert!(result.summary.secondary_contact_ids.is_empty());
    assert_eq!(result.outcome, ReconcileOutcome::CreatedPrimary);
    Ok(())
}

#[tokio::test]
async fn test_exact_resubmission_is_idempotent() -> LinkageResult<()> {
    let store = InMemoryContactStore::new();
    let reconciler = reconciler_for(&store);

    let first = reconciler.identify(some("a@b.com"), some("111")).await?;
    let second = reconciler.identify(some("a@b.com"), some("111")).await?;

    assert_eq!(store.len()?, 1);
    assert_eq!(first.summary, second.summary);
    assert_eq!(second.outcome, ReconcileOutcome::Matched);
    assert_eq!(second.created, None);
    Ok(())
}

#[tokio::test]
async fn test_partial_match_extends_without_creating() -> LinkageResult<()> {
    let store = seeded_store([primary_contact(
        1,
        timestamp(2020, 1, 1),
        Some("a@b.com"),
        Some("111"),
    )]);

    let result = reconciler_for(&store).identify(some("a@b.com"), None).await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(result.summary.emails, vec!["a@b.com"]);
    assert_eq!(result.summary.phone_numbers, vec!["111"]);
    assert_eq!(store.len()?, 1);
    Ok(())
}

#[tokio::test]
async fn test_novel_identifier_adds_secondary() -> LinkageResult<()> {
    let store = seeded_store([primary_contact(
        1,
        timestamp(2020, 1, 1),
        Some("a@b.com"),
        Some("111"),
    )]);

    let result = reconciler_for(&store)
        .identify(some("new@b.com"), some("111"))
        .await?;

    let created = result.created.expect("a secondary should be created");
    let stored = store.get(created)?.expect("created contact is stored");
    assert_eq!(stored.precedence, LinkPrecedence::Secondary);
    assert_eq!(stored.linked_id, Some(ContactId(1)));
    assert_eq!(stored.email.as_deref(), Some("new@b.com"));
    assert_eq!(stored.phone_number.as_deref(), Some("111"));
    assert_eq!(result.summary.phone_numbers, vec!["111"]);
    assert_eq!(result.summary.secondary_contact_ids, vec![created]);
    assert_eq!(result.summary.emails, vec!["a@b.com", "new@b.com"]);
    assert_eq!(result.outcome, ReconcileOutcome::CreatedSecondary);
    Ok(())
}

#[tokio::test]
async fn test_unmatched_identifier_alone_starts_new_cluster() -> LinkageResult<()> {
    let store = seeded_store([primary_contact(
        1,
        timestamp(2020, 1, 1),
        Some("a@b.com"),
        Some("111"),
    )]);

    let result = reconciler_for(&store)
        .identify(some("new@b.com"), None)
        .await?;

    assert_eq!(result.outcome, ReconcileOutcome::CreatedPrimary);
    assert_ne!(result.summary.primary_contact_id, ContactId(1));
    assert!(result.summary.secondary_contact_ids.is_empty());
    assert_eq!(store.len()?, 2);
    Ok(())
}

#[tokio::test]
async fn test_older_primary_wins_merge() -> LinkageResult<()> {
    let store = two_cluster_store();

    let result = reconciler_for(&store)
        .identify(some("a@b.com"), some("222"))
        .await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(result.summary.secondary_contact_ids, vec![ContactId(2)]);
    assert_eq!(result.summary.emails, vec!["a@b.com", "b@b.com"]);
    assert_eq!(result.summary.phone_numbers, vec!["111", "222"]);
    assert_eq!(result.outcome, ReconcileOutcome::Merged);
    assert_eq!(result.created, None);

    let demoted = store.get(ContactId(2))?.expect("contact 2 exists");
    assert_eq!(demoted.precedence, LinkPrecedence::Secondary);
    assert_eq!(demoted.linked_id, Some(ContactId(1)));
    assert_eq!(store.len()?, 2);
    assert_cluster_invariants(&store.list_all().await?);
    Ok(())
}

#[tokio::test]
async fn test_merge_order_does_not_depend_on_submission_side() -> LinkageResult<()> {
    let store = two_cluster_store();

    let result = reconciler_for(&store)
        .identify(some("b@b.com"), some("111"))
        .await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(result.summary.secondary_contact_ids, vec![ContactId(2)]);
    Ok(())
}

#[tokio::test]
async fn test_equal_timestamps_break_ties_on_id() -> LinkageResult<()> {
    let at = timestamp(2020, 6, 1);
    let store = seeded_store([
        primary_contact(4, at, Some("x@b.com"), None),
        primary_contact(9, at, None, Some("999")),
    ]);

    let result = reconciler_for(&store)
        .identify(some("x@b.com"), some("999"))
        .await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(4));
    assert_eq!(result.summary.secondary_contact_ids, vec![ContactId(9)]);
    Ok(())
}

#[tokio::test]
async fn test_merge_through_secondary_flattens_loser_cluster() -> LinkageResult<()> {
    let store = seeded_store([
        primary_contact(1, timestamp(2020, 1, 1), Some("a@b.com"), Some("111")),
        secondary_contact(2, timestamp(2020, 2, 1), Some("c@b.com"), Some("111"), 1),
        primary_contact(3, timestamp(2021, 1, 1), Some("b@b.com"), Some("222")),
        secondary_contact(4, timestamp(2021, 2, 1), Some("d@b.com"), Some("222"), 3),
    ]);

    let result = reconciler_for(&store)
        .identify(some("c@b.com"), some("222"))
        .await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(
        result.summary.secondary_contact_ids,
        vec![ContactId(2), ContactId(3), ContactId(4)]
    );
    assert_eq!(result.relinked, vec![ContactId(3), ContactId(4)]);

    let contacts = store.list_all().await?;
    assert_cluster_invariants(&contacts);
    assert_summary_matches_store(&result.summary, &contacts);
    for contact in contacts.iter().filter(|c| c.id != ContactId(1)) {
        assert_eq!(contact.linked_id, Some(ContactId(1)));
    }
    Ok(())
}

#[tokio::test]
async fn test_identifier_split_across_clusters_is_merged_on_next_sighting() -> LinkageResult<()> {
    // Contact 3 was created as a primary by another process that could not
    // yet see the committed secondary 2 holding the same email.
    let store = seeded_store([
        primary_contact(1, timestamp(2020, 1, 1), Some("c@b.com"), Some("111")),
        secondary_contact(2, timestamp(2020, 2, 1), Some("a@b.com"), Some("222"), 1),
        primary_contact(3, timestamp(2020, 2, 1), Some("a@b.com"), None),
    ]);

    let result = reconciler_for(&store).identify(some("a@b.com"), None).await?;

    assert_eq!(result.outcome, ReconcileOutcome::Merged);
    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(
        result.summary.secondary_contact_ids,
        vec![ContactId(2), ContactId(3)]
    );
    assert_eq!(result.summary.emails, vec!["c@b.com", "a@b.com"]);
    assert_eq!(result.created, None);

    let contacts = store.list_all().await?;
    assert_cluster_invariants(&contacts);
    assert_summary_matches_store(&result.summary, &contacts);
    Ok(())
}

#[tokio::test]
async fn test_merge_and_new_identifier_together() -> LinkageResult<()> {
    let store = seeded_store([
        primary_contact(1, timestamp(2020, 1, 1), Some("a@b.com"), None),
        primary_contact(2, timestamp(2021, 1, 1), None, Some("222")),
    ]);

    // Only one side matches each cluster: no new record beyond the merge.
    let merged = reconciler_for(&store)
        .identify(some("a@b.com"), some("222"))
        .await?;
    assert_eq!(merged.outcome, ReconcileOutcome::Merged);
    assert_eq!(store.len()?, 2);

    let extended = reconciler_for(&store)
        .identify(some("a@b.com"), some("333"))
        .await?;
    assert_eq!(extended.outcome, ReconcileOutcome::CreatedSecondary);
    assert_eq!(extended.summary.phone_numbers, vec!["222", "333"]);
    assert_eq!(store.len()?, 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_identifiers_deduplicated() -> LinkageResult<()> {
    let store = InMemoryContactStore::new();
    let reconciler = reconciler_for(&store);

    reconciler.identify(some("a@b.com"), some("111")).await?;
    reconciler.identify(some("a@b.com"), some("222")).await?;
    reconciler.identify(some("b@b.com"), some("222")).await?;
    let result = reconciler.identify(some("b@b.com"), some("111")).await?;

    assert_eq!(result.summary.emails, vec!["a@b.com", "b@b.com"]);
    assert_eq!(result.summary.phone_numbers, vec!["111", "222"]);
    assert_eq!(result.summary.secondary_contact_ids.len(), 2);
    assert_eq!(result.outcome, ReconcileOutcome::Matched);
    Ok(())
}

#[tokio::test]
async fn test_missing_identifiers_rejected_without_store_access() {
    let store = CountingStore::new(Arc::new(InMemoryContactStore::new()));
    let reconciler = Reconciler::with_defaults(Arc::new(store.clone()));

    assert_invalid_request(&reconciler.identify(None, None).await);
    assert_invalid_request(&reconciler.identify(some(""), some("   ")).await);
    assert_eq!(store.total_calls(), 0);
}

#[tokio::test]
async fn test_consistent_cluster_expands_once() -> LinkageResult<()> {
    let inner = two_cluster_store();
    let store = CountingStore::new(Arc::new(inner));
    let reconciler = Reconciler::with_defaults(Arc::new(store.clone()));

    reconciler.identify(some("a@b.com"), some("111")).await?;
    assert_eq!(store.calls(StoreOperation::FindMatching), 1);
    assert_eq!(store.calls(StoreOperation::FindByIdsOrLinkedTo), 1);
    assert_eq!(store.calls(StoreOperation::BatchUpdatePrecedence), 0);
    assert_eq!(store.calls(StoreOperation::Create), 0);
    Ok(())
}

#[tokio::test]
async fn test_cluster_without_primary_is_invariant_violation() {
    let store = seeded_store([
        secondary_contact(2, timestamp(2020, 1, 1), Some("a@b.com"), None, 3),
        secondary_contact(3, timestamp(2020, 1, 2), Some("b@b.com"), None, 2),
    ]);

    let result = reconciler_for(&store).identify(some("a@b.com"), None).await;
    assert_invariant_violation(&result);
}

#[tokio::test]
async fn test_dangling_link_is_healed_by_expansion() -> LinkageResult<()> {
    // Contact 5 still points at 2, which a concurrent merge demoted under 1.
    let store = seeded_store([
        primary_contact(1, timestamp(2020, 1, 1), Some("a@b.com"), None),
        secondary_contact(2, timestamp(2021, 1, 1), None, Some("222"), 1),
        secondary_contact(5, timestamp(2022, 1, 1), Some("e@b.com"), None, 2),
    ]);

    let result = reconciler_for(&store).identify(some("e@b.com"), None).await?;

    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(result.relinked, vec![ContactId(5)]);
    assert_cluster_invariants(&store.list_all().await?);
    Ok(())
}

#[tokio::test]
async fn test_store_failure_surfaces_as_storage_error() {
    let store = FailingStore::new(Arc::new(two_cluster_store())).fail_always(
        StoreOperation::BatchUpdatePrecedence,
        StorageError::TransactionFailed {
            reason: "serialization failure".to_string(),
        },
    );
    let reconciler = Reconciler::with_defaults(Arc::new(store.clone()));

    let result = reconciler.identify(some("a@b.com"), some("222")).await;
    assert_storage_error(&result);

    // Nothing was demoted.
    let contacts = store.list_all().await.unwrap();
    assert!(contacts.iter().all(|c| c.is_primary()));
}

#[tokio::test]
async fn test_unique_violation_retried_then_succeeds() -> LinkageResult<()> {
    let inner = InMemoryContactStore::new();
    let store = RivalWriterStore::new(
        Arc::new(inner.clone()),
        NewContact::primary(some("a@b.com"), None),
    );
    let reconciler = Reconciler::with_defaults(Arc::new(store));

    let result = reconciler.identify(some("a@b.com"), some("111")).await?;

    assert_eq!(result.attempts, 2);
    assert_eq!(result.outcome, ReconcileOutcome::CreatedSecondary);
    let contacts = inner.list_all().await?;
    assert_eq!(contacts.iter().filter(|c| c.is_primary()).count(), 1);
    assert_cluster_invariants(&contacts);
    Ok(())
}

#[tokio::test]
async fn test_aborted_merge_transaction_is_retried() -> LinkageResult<()> {
    let inner = two_cluster_store();
    let store = CountingStore::new(Arc::new(
        FailingStore::new(Arc::new(inner.clone())).fail_times(
            StoreOperation::BatchUpdatePrecedence,
            StorageError::TransactionAborted {
                reason: "deadlock detected".to_string(),
            },
            1,
        ),
    ));
    let reconciler = Reconciler::with_defaults(Arc::new(store.clone()));

    let result = reconciler.identify(some("a@b.com"), some("222")).await?;

    assert_eq!(result.attempts, 2);
    assert_eq!(result.outcome, ReconcileOutcome::Merged);
    assert_eq!(result.summary.primary_contact_id, ContactId(1));
    assert_eq!(store.calls(StoreOperation::BatchUpdatePrecedence), 2);
    assert_cluster_invariants(&inner.list_all().await?);
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_surface_conflict() {
    let conflict = StorageError::UniqueViolation {
        identifier: "email:a@b.com".to_string(),
    };
    let store = CountingStore::new(Arc::new(
        FailingStore::new(Arc::new(InMemoryContactStore::new())).fail_always(
            StoreOperation::Create,
            conflict.clone(),
        ),
    ));
    let config = ReconcileConfig {
        max_attempts: 2,
        lock_scope: LockScope::Identifier,
    };
    let reconciler = Reconciler::new(Arc::new(store.clone()), config).unwrap();

    let err = reconciler
        .identify(some("a@b.com"), None)
        .await
        .unwrap_err();
    assert_eq!(err, LinkageError::Storage(conflict));
    assert_eq!(store.calls(StoreOperation::Create), 2);
}

#[tokio::test]
async fn test_non_conflict_errors_not_retried() {
    let store = CountingStore::new(Arc::new(
        FailingStore::new(Arc::new(InMemoryContactStore::new())).fail_always(
            StoreOperation::FindMatching,
            StorageError::Unavailable {
                reason: "connection refused".to_string(),
            },
        ),
    ));
    let reconciler = Reconciler::with_defaults(Arc::new(store.clone()));

    assert_storage_error(&reconciler.identify(some("a@b.com"), None).await);
    assert_eq!(store.calls(StoreOperation::FindMatching), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_sightings_produce_one_cluster() -> LinkageResult<()> {
    for scope in [LockScope::Identifier, LockScope::Global] {
        let store = InMemoryContactStore::new();
        let config = ReconcileConfig {
            max_attempts: 3,
            lock_scope: scope,
        };
        let reconciler = Reconciler::new(Arc::new(store.clone()), config)?;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reconciler = reconciler.clone();
                let phone = if i % 2 == 0 { Some("111".to_string()) } else { None };
                tokio::spawn(async move {
                    reconciler.identify(Some("same@b.com".to_string()), phone).await
                })
            })
            .collect();

        let mut primaries = Vec::new();
        for handle in handles {
            let result = handle.await.expect("task panicked")?;
            primaries.push(result.summary.primary_contact_id);
        }

        primaries.dedup();
        assert_eq!(primaries.len(), 1, "scope {scope}: more than one cluster");
        let contacts = store.list_all().await?;
        assert_eq!(contacts.iter().filter(|c| c.is_primary()).count(), 1);
        assert_cluster_invariants(&contacts);
        assert_eq!(reconciler.locks().active_keys(), 0);
    }
    Ok(())
}

mod prop_tests {
    use super::*;
    use linkage_test_utils::generators::arb_request_sequence;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_invariants_hold_after_any_sequence(requests in arb_request_sequence(12)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store = InMemoryContactStore::new();
                let reconciler = reconciler_for(&store);

                for (email, phone) in requests {
                    let result = reconciler.identify(email, phone).await.unwrap();
                    let contacts = store.list_all().await.unwrap();
                    assert_cluster_invariants(&contacts);
                    assert_summary_matches_store(&result.summary, &contacts);
                }
            });
        }

        #[test]
        fn prop_resubmission_never_creates(requests in arb_request_sequence(8)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            runtime.block_on(async {
                let store = InMemoryContactStore::new();
                let reconciler = reconciler_for(&store);

                for (email, phone) in requests {
                    let first = reconciler.identify(email.clone(), phone.clone()).await.unwrap();
                    let before = store.len().unwrap();
                    let again = reconciler.identify(email, phone).await.unwrap();
                    assert_eq!(store.len().unwrap(), before);
                    assert_eq!(again.summary.primary_contact_id, first.summary.primary_contact_id);
                    assert_eq!(again.outcome, ReconcileOutcome::Matched);
                }
            });
        }
    }
}
