//! Update integration tests for subscription-service.

mod common;

use common::{eventually, TestApp};
use std::error::Error;
use std::time::Duration;
use subscription_service::error::{Collaborator, Operation};
use subscription_service::models::Subscription;
use subscription_service::services::metrics::{UPDATE_CALLED, UPDATE_PARTIAL_FAILURE};
use subscription_service::{SubscriptionError, SubscriptionService};

fn existing() -> Vec<Subscription> {
    vec![Subscription::new("basic")
        .with_id("42")
        .with_third_party_id("sub_42")]
}

#[tokio::test]
async fn update_writes_both_sides_under_the_path_id() {
    let app = TestApp::spawn_with_store(existing());

    let body = Subscription::new("pro").with_id("client-supplied");
    let updated = app.service.update("42", body).await;

    assert_eq!(updated.unwrap(), true);
    assert_eq!(app.repository.get("42").unwrap().plan, "pro");
    assert!(app.repository.get("client-supplied").is_none());

    let billed = app.billing.updated();
    assert_eq!(billed.len(), 1);
    assert_eq!(billed[0].id.as_deref(), Some("42"));

    assert_eq!(app.metrics.count(UPDATE_CALLED), 1);
    assert_eq!(app.metrics.count(UPDATE_PARTIAL_FAILURE), 0);
}

#[tokio::test]
async fn update_rejects_on_billing_failure_and_records_the_partial_write() {
    let app = TestApp::spawn_with_store(existing());
    app.billing.script.fail_on("update");

    let err = app
        .service
        .update("42", Subscription::new("pro"))
        .await
        .unwrap_err();

    match &err {
        SubscriptionError::BillingFailure { operation, id, .. } => {
            assert_eq!(*operation, Operation::Update);
            assert_eq!(id.as_deref(), Some("42"));
        }
        other => panic!("expected a billing failure, got {:?}", other),
    }
    assert_eq!(
        err.to_string(),
        "Unable to update billing subscription with id=42"
    );

    eventually(|| app.repository.get("42").map(|s| s.plan) == Some("pro".to_string())).await;
    eventually(|| app.metrics.count(UPDATE_PARTIAL_FAILURE) == 1).await;
}

#[tokio::test]
async fn update_rejects_on_store_failure() {
    let app = TestApp::spawn_with_store(existing());
    app.repository.script.fail_on("update");

    let err = app
        .service
        .update("42", Subscription::new("pro"))
        .await
        .unwrap_err();

    assert!(matches!(err, SubscriptionError::PersistenceFailure { .. }));
    assert_eq!(err.to_string(), "Unable to update subscription with id=42");
    eventually(|| app.metrics.count(UPDATE_PARTIAL_FAILURE) == 1).await;
}

#[tokio::test]
async fn update_rejects_when_the_store_panics() {
    let app = TestApp::spawn_with_store(existing());
    app.repository.script.panic_on("update");

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        app.service.update("42", Subscription::new("pro")),
    )
    .await
    .expect("update promise never settled")
    .unwrap_err();

    assert!(matches!(err, SubscriptionError::PersistenceFailure { .. }));
    assert_eq!(
        err.source().unwrap().to_string(),
        "persistence call panicked: update exploded"
    );
    eventually(|| app.billing.updated().len() == 1).await;
    eventually(|| app.metrics.count(UPDATE_PARTIAL_FAILURE) == 1).await;
}

#[tokio::test(start_paused = true)]
async fn update_rejects_without_waiting_for_the_slower_side() {
    let app = TestApp::spawn_with_store(existing());
    app.repository.script.delay("update", Duration::from_secs(10));
    app.billing.script.fail_on("update");

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        app.service.update("42", Subscription::new("pro")),
    )
    .await
    .expect("update should reject before the store answers");

    assert!(matches!(
        outcome,
        Err(SubscriptionError::BillingFailure { .. })
    ));
    assert_eq!(app.metrics.count(UPDATE_PARTIAL_FAILURE), 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(app.metrics.count(UPDATE_PARTIAL_FAILURE), 1);
}

#[tokio::test(start_paused = true)]
async fn update_resolves_only_after_both_sides_answer() {
    let app = TestApp::spawn_with_store(existing());
    app.billing.script.delay("update", Duration::from_millis(300));

    let promise = app.service.update("42", Subscription::new("pro"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.repository.get("42").unwrap().plan, "pro");
    assert!(promise.is_pending());

    assert_eq!(promise.await.unwrap(), true);
}

#[tokio::test]
async fn update_failing_on_both_sides_is_not_a_partial_write() {
    let app = TestApp::spawn_with_store(existing());
    app.repository.script.fail_on("update");
    app.billing.script.fail_on("update");

    let err = app
        .service
        .update("42", Subscription::new("pro"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SubscriptionError::BillingFailure { .. } | SubscriptionError::PersistenceFailure { .. }
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.metrics.count(UPDATE_PARTIAL_FAILURE), 0);
    assert_eq!(app.repository.get("42").unwrap().plan, "basic");
}

#[tokio::test]
async fn update_of_an_unknown_id_still_resolves() {
    let app = TestApp::spawn();

    let updated = app.service.update("nope", Subscription::new("pro")).await;

    assert_eq!(updated.unwrap(), true);
    assert_eq!(app.billing.updated().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_each_settle_once() {
    let app = TestApp::spawn_with_store(existing());

    let promises: Vec<_> = (0..50)
        .map(|n| {
            app.service
                .update("42", Subscription::new(format!("plan-{}", n)))
        })
        .collect();

    for promise in promises {
        assert_eq!(promise.await.unwrap(), true);
    }
    assert_eq!(app.metrics.count(UPDATE_CALLED), 50);
    assert_eq!(app.billing.updated().len(), 50);
    assert_eq!(app.metrics.count(UPDATE_PARTIAL_FAILURE), 0);
}

#[test]
fn partial_failures_name_the_failed_side() {
    let err = SubscriptionError::PartialFailure {
        operation: Operation::Update,
        id: "42".to_string(),
        failed: Collaborator::Billing,
        source: anyhow::anyhow!("card declined").into(),
    };

    assert_eq!(
        err.to_string(),
        "Partial update of subscription with id=42: billing failed, the other side was applied"
    );
}
