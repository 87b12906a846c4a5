//! Property-Based Tests for `/identify` over HTTP
//!
//! For any sequence of identifier pairs posted to `/identify`:
//! - every response is 200 and describes the cluster as stored
//! - the stored contacts keep one primary per cluster, the oldest member
//! - replaying any earlier request stores nothing new

use std::sync::Arc;

use linkage_storage::{ContactStore, InMemoryContactStore};
use linkage_test_utils::assertions::{assert_cluster_invariants, assert_summary_matches_store};
use linkage_test_utils::generators::arb_request_sequence;
use linkage_test_utils::ContactSummary;
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::runtime::Runtime;

#[path = "support/app.rs"]
mod app_support;
use app_support::{app_with_store, identify, unlimited_config};

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn request_body(email: &Option<String>, phone_number: &Option<String>) -> Value {
    json!({ "email": email, "phoneNumber": phone_number })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_responses_match_store(requests in arb_request_sequence(12)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryContactStore::new());
            let app = app_with_store(store.clone(), &unlimited_config())
                .map_err(TestCaseError::fail)?;

            for (email, phone_number) in &requests {
                let contact = identify(&app, request_body(email, phone_number))
                    .await
                    .map_err(TestCaseError::fail)?;
                let summary: ContactSummary = serde_json::from_value(contact)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                let stored = store
                    .list_all()
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                assert_cluster_invariants(&stored);
                assert_summary_matches_store(&summary, &stored);

                if let Some(email) = email {
                    prop_assert!(summary.emails.contains(email));
                }
                if let Some(phone_number) = phone_number {
                    prop_assert!(summary.phone_numbers.contains(phone_number));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_replay_stores_nothing_new(requests in arb_request_sequence(10)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryContactStore::new());
            let app = app_with_store(store.clone(), &unlimited_config())
                .map_err(TestCaseError::fail)?;

            for (email, phone_number) in &requests {
                identify(&app, request_body(email, phone_number))
                    .await
                    .map_err(TestCaseError::fail)?;
            }
            let before = store
                .list_all()
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?
                .len();

            for (email, phone_number) in &requests {
                identify(&app, request_body(email, phone_number))
                    .await
                    .map_err(TestCaseError::fail)?;
            }
            let after = store
                .list_all()
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?
                .len();

            prop_assert_eq!(before, after);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
