//! Integration tests for the retry schedule.
//!
//! Tests verify the fixed backoff sequence, eventual success after failures,
//! terminal failure after the final attempt, and stale task handling.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use notify_webhooks::models::{DeliveryStatus, WebhookEventType};
use notify_webhooks::scheduler::{DeliveryTask, TaskTrigger};
use notify_webhooks::services::delivery_worker::{AttemptOutcome, SkipReason, MAX_ATTEMPTS};
use notify_webhooks::{DeliveryRepository, EndpointRepository, WebhookEvent};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

async fn failing_server(responder: FailingResponder) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(responder)
        .mount(&mock_server)
        .await;
    mock_server
}

async fn dispatch_one(harness: &Harness, url: &str) -> uuid::Uuid {
    harness.register(TENANT_A, url, &["invoice.payment_failed"]).await;
    let event = WebhookEvent::new(
        TENANT_A,
        WebhookEventType::InvoicePaymentFailed,
        serde_json::json!({ "invoice_id": "inv_9" }),
    );
    let created = harness.dispatcher.dispatch(&event).await.unwrap();
    created[0].id
}

/// Test: A failed first attempt becomes attempt 2, due in 60 seconds.
#[tokio::test]
async fn test_first_failure_schedules_retry_in_one_minute() {
    let responder = FailingResponder::fail_times(u32::MAX);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    let before = Utc::now();
    let outcomes = harness.run_scheduled().await;
    assert!(matches!(
        outcomes[0],
        AttemptOutcome::RetryScheduled { next_attempt: 2, .. }
    ));

    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.attempt, 2);
    assert_eq!(delivery.response_code, Some(500));
    let next_retry_at = delivery.next_retry_at.expect("retry time set");
    let wait = (next_retry_at - before).num_seconds();
    assert!((59..=61).contains(&wait), "expected ~60s, got {wait}s");

    let scheduled = harness.scheduler.scheduled();
    assert_eq!(scheduled.len(), 1);
    let (task, delay) = scheduled[0];
    assert_eq!(task.delivery_id, delivery_id);
    assert_eq!(task.attempt, 2);
    assert_eq!(task.trigger, TaskTrigger::Retry);
    assert!(delay <= Duration::from_secs(60) && delay >= Duration::from_secs(59));
}

/// Test: Backoff follows 60s, 5min, 30min, 2h, 24h and the sixth failure is
/// terminal with nothing further scheduled.
#[tokio::test]
async fn test_backoff_sequence_and_terminal_failure() {
    let responder = FailingResponder::fail_times(u32::MAX);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    let mut delays = Vec::new();
    let mut outcomes = Vec::new();
    while !harness.scheduler.is_empty() {
        for (task, delay) in harness.scheduler.take() {
            if task.trigger == TaskTrigger::Retry {
                delays.push(delay.as_secs());
            }
            outcomes.push(harness.worker.execute(task).await.unwrap());
        }
    }

    // Delays are computed from `now`, so allow a second of drift.
    let expected = [60u64, 300, 1800, 7200, 86400];
    assert_eq!(delays.len(), expected.len());
    for (actual, expected) in delays.iter().zip(expected) {
        assert!(
            *actual == expected || *actual + 1 == expected,
            "expected ~{expected}s, got {actual}s"
        );
    }

    assert_eq!(responder.attempt_count(), MAX_ATTEMPTS as u32);
    assert_eq!(
        outcomes.last(),
        Some(&AttemptOutcome::Failed { response_code: 500 })
    );

    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempt, MAX_ATTEMPTS);
    assert!(delivery.next_retry_at.is_none());
    assert!(delivery.delivered_at.is_none());
}

/// Test: Success on the third attempt ends the retry loop.
#[tokio::test]
async fn test_eventual_success_stops_retries() {
    let responder = FailingResponder::fail_times(2);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    let outcomes = harness.run_until_idle().await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes[2],
        AttemptOutcome::Delivered { response_code: 200 }
    );
    assert_eq!(responder.attempt_count(), 3);
    assert!(harness.scheduler.is_empty());

    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempt, 3);
    assert!(delivery.delivered_at.is_some());
    assert!(delivery.next_retry_at.is_none());
}

/// Test: 4xx responses are retried like any other non-2xx.
#[tokio::test]
async fn test_client_errors_are_retried() {
    let responder = FailingResponder::fail_with_status(1, 404);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    harness.run_scheduled().await;
    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.response_code, Some(404));

    harness.run_scheduled().await;
    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempt, 2);
}

/// Test: A task for an attempt that already ran is dropped without a request.
#[tokio::test]
async fn test_stale_task_is_skipped() {
    let responder = FailingResponder::fail_times(u32::MAX);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    let first = DeliveryTask {
        tenant_id: TENANT_A,
        delivery_id,
        attempt: 1,
        trigger: TaskTrigger::Dispatch,
    };
    harness.worker.execute(first).await.unwrap();

    // Redelivered copy of the same task.
    let outcome = harness.worker.execute(first).await.unwrap();

    assert_eq!(outcome, AttemptOutcome::Skipped(SkipReason::Stale));
    assert_eq!(responder.attempt_count(), 1);
    assert_eq!(harness.delivery(TENANT_A, delivery_id).await.attempt, 2);
}

/// Test: Tasks for a delivery that already succeeded never send again.
#[tokio::test]
async fn test_succeeded_delivery_is_never_resent() {
    let responder = FailingResponder::fail_times(0);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;

    harness.run_scheduled().await;
    let task = DeliveryTask {
        tenant_id: TENANT_A,
        delivery_id,
        attempt: 1,
        trigger: TaskTrigger::Recovery,
    };
    let outcome = harness.worker.execute(task).await.unwrap();

    assert_eq!(outcome, AttemptOutcome::Skipped(SkipReason::Stale));
    assert_eq!(responder.attempt_count(), 1);
}

/// Test: An endpoint secret that cannot be decrypted is a failed attempt
/// with code 0 and goes down the normal retry path without a request.
#[tokio::test]
async fn test_undecryptable_secret_is_a_failed_attempt() {
    let responder = FailingResponder::fail_times(0);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let endpoint = harness
        .register(TENANT_A, &mock_server.uri(), &["invoice.payment_failed"])
        .await;
    let endpoint_id = endpoint.endpoint.id;
    harness
        .endpoints
        .set_secret(TENANT_A, endpoint_id, "not-a-valid-ciphertext")
        .await
        .unwrap();

    let event = WebhookEvent::new(
        TENANT_A,
        WebhookEventType::InvoicePaymentFailed,
        serde_json::json!({ "invoice_id": "inv_3" }),
    );
    let delivery_id = harness.dispatcher.dispatch(&event).await.unwrap()[0].id;

    let outcomes = harness.run_scheduled().await;
    assert!(matches!(
        outcomes[0],
        AttemptOutcome::RetryScheduled { next_attempt: 2, .. }
    ));
    assert_eq!(responder.attempt_count(), 0);

    let delivery = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.attempt, 2);
    assert_eq!(delivery.response_code, Some(0));
    assert!(delivery
        .response_body
        .as_deref()
        .is_some_and(|body| body.contains("decrypt")));

    let stored = harness
        .endpoints
        .find_by_id(TENANT_A, endpoint_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.failure_count, 1);
    assert_eq!(harness.scheduler.scheduled().len(), 1);
}

/// Test: Deactivating an endpoint between attempts drops the next attempt.
/// The delivery row and the failure count stay as they were, and the
/// delivery only comes back through a manual retry.
#[tokio::test]
async fn test_deactivated_between_attempts_abandons_delivery() {
    let responder = FailingResponder::fail_times(1);
    let mock_server = failing_server(responder.clone()).await;
    let harness = Harness::new();
    let delivery_id = dispatch_one(&harness, &mock_server.uri()).await;
    harness.run_scheduled().await;

    let before = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(before.status, DeliveryStatus::Retrying);
    assert_eq!(before.attempt, 2);
    let endpoint_id = before.endpoint_id;

    harness
        .endpoint_service
        .deactivate(TENANT_A, endpoint_id)
        .await
        .unwrap();

    let outcomes = harness.run_scheduled().await;
    assert_eq!(
        outcomes,
        vec![AttemptOutcome::Skipped(SkipReason::EndpointIneligible)]
    );
    assert_eq!(responder.attempt_count(), 1);
    assert!(harness.scheduler.is_empty());

    let after = harness.delivery(TENANT_A, delivery_id).await;
    assert_eq!(after.status, DeliveryStatus::Retrying);
    assert_eq!(after.attempt, 2);
    assert_eq!(after.response_code, before.response_code);
    assert_eq!(after.next_retry_at, before.next_retry_at);
    assert!(after.abandoned_at.is_some());

    let endpoint = harness
        .endpoints
        .find_by_id(TENANT_A, endpoint_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(endpoint.failure_count, 1);

    let unfinished = harness.deliveries.list_unfinished().await.unwrap();
    assert!(unfinished.iter().all(|d| d.id != delivery_id));

    // Reactivation alone does not resend; a manual retry does.
    harness
        .endpoint_service
        .reactivate(TENANT_A, endpoint_id)
        .await
        .unwrap();
    assert!(harness.scheduler.is_empty());

    let retried = harness
        .history
        .retry_delivery(TENANT_A, endpoint_id, delivery_id)
        .await
        .unwrap();
    assert_eq!(retried.status, DeliveryStatus::Success);
    assert!(retried.abandoned_at.is_none());
    assert_eq!(responder.attempt_count(), 2);
}
