mod common;

use chrono::Utc;
use common::*;
use recon_engine::domain::audit::Actor;
use recon_engine::domain::email::TemplateKind;
use recon_engine::domain::error::PipelineError;
use recon_engine::domain::id::RemoteId;
use recon_engine::domain::money::{Currency, MoneyAmount};
use recon_engine::domain::payment::PaymentStatus;
use recon_engine::domain::provider::{
    RemotePaymentStatus, RemoteSubscription, RemoteSubscriptionStatus,
};
use recon_engine::domain::store::SubscriptionStore;
use recon_engine::domain::subscription::{
    ActivationSource, BillingCadence, NewSubscription, Pricing, SubscriptionStatus,
};
use recon_engine::services::pipeline::ProcessResult;
use recon_engine::services::reconciler::ReconcileOutcome;
use recon_engine::services::subscriptions::SubscribeOutcome;

fn status_changes(h: &Harness) -> usize {
    h.store
        .sync_log()
        .iter()
        .filter(|e| e.action == "status_changed")
        .count()
}

async fn active_subscription(h: &Harness, owner: &str) -> (uuid::Uuid, String, String) {
    let (id, reference, remote_id) = match h.subscribe(owner, "gold").await {
        SubscribeOutcome::Created {
            subscription_id,
            external_reference,
            remote_subscription_id,
            ..
        } => (subscription_id, external_reference, remote_subscription_id),
        other => panic!("expected Created, got {other:?}"),
    };
    h.gateway
        .set_subscription_status(&remote_id, RemoteSubscriptionStatus::Authorized);
    h.engine
        .pipeline
        .handle(&notification("subscription_preapproval", &remote_id), Actor::Webhook)
        .await
        .unwrap();
    (id, reference, remote_id)
}

// ── Concurrent identical deliveries ────────────────────────────────────────
// Five copies of the same approval arrive at once. Exactly one applies the
// transition and sends the email; the rest see the cached result or the lock.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_notifications_transition_once() {
    let h = Harness::new();
    let order = h.pending_order("ana").await;
    h.gateway.put_payment(remote_payment(
        "1001",
        RemotePaymentStatus::Approved,
        Some(&order.reference),
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .pipeline
                .handle(&notification("payment", "1001"), Actor::Webhook)
                .await
                .unwrap()
        }));
    }

    let mut transitioned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ProcessResult::Reconciled(ReconcileOutcome::Transitioned { from, to, .. }) => {
                assert_eq!((from.as_str(), to.as_str()), ("pending", "confirmed"));
                transitioned += 1;
            }
            ProcessResult::Cached(_) | ProcessResult::Contended => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    assert_eq!(transitioned, 1, "exactly one delivery applies the change");
    assert_eq!(h.email.count(TemplateKind::PaymentConfirmed), 1);
    assert_eq!(status_changes(&h), 1);
    assert_eq!(h.store.lock_count(), 0, "every lock released");

    let stored = h.engine.orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Confirmed);
    assert_eq!(stored.remote_payment_id.as_deref(), Some("1001"));
    assert_eq!(stored.payment_method.as_deref(), Some("pix"));
    assert!(stored.confirmed_at.is_some());
}

#[tokio::test]
async fn redelivery_is_served_from_the_result_cache() {
    let h = Harness::new();
    let order = h.pending_order("bia").await;
    h.gateway.put_payment(remote_payment(
        "1002",
        RemotePaymentStatus::Approved,
        Some(&order.reference),
    ));
    let n = notification("payment", "1002");

    let first = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert_eq!(first.status(), "updated");

    let second = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert!(matches!(second, ProcessResult::Cached(ReconcileOutcome::Transitioned { .. })));
    assert_eq!(second.status(), "duplicate");
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn stale_pending_after_confirmation_is_an_anomaly() {
    let h = Harness::new();
    let order = h.pending_order("caio").await;
    h.gateway.put_payment(remote_payment(
        "1003",
        RemotePaymentStatus::Approved,
        Some(&order.reference),
    ));
    h.engine
        .pipeline
        .handle(&notification("payment", "1003"), Actor::Webhook)
        .await
        .unwrap();

    // Gateway now claims the payment is back in process.
    h.gateway.put_payment(remote_payment(
        "1003",
        RemotePaymentStatus::InProcess,
        Some(&order.reference),
    ));
    let result = h
        .engine
        .pipeline
        .handle(&notification("payment", "1003"), Actor::Webhook)
        .await
        .unwrap();

    match result {
        ProcessResult::Reconciled(ReconcileOutcome::Anomaly { current, incoming, .. }) => {
            assert_eq!(current, "confirmed");
            assert_eq!(incoming, "pending");
        }
        other => panic!("expected anomaly, got {other:?}"),
    }
    let stored = h.engine.orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Confirmed, "never regresses");
    assert!(h.store.sync_log().iter().any(|e| e.action == "anomaly"));
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn refund_after_confirmation_sends_refund_email() {
    let h = Harness::new();
    let order = h.pending_order("dani").await;
    for status in [RemotePaymentStatus::Approved, RemotePaymentStatus::Refunded] {
        h.gateway
            .put_payment(remote_payment("1004", status, Some(&order.reference)));
        h.engine
            .pipeline
            .handle(&notification("payment", "1004"), Actor::Webhook)
            .await
            .unwrap();
    }

    let stored = h.engine.orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert_eq!(h.email.count(TemplateKind::PaymentConfirmed), 1);
    assert_eq!(h.email.count(TemplateKind::PaymentRefunded), 1);
}

#[tokio::test]
async fn unknown_remote_resource_is_not_found() {
    let h = Harness::new();
    let err = h
        .engine
        .pipeline
        .handle(&notification("payment", "404404"), Actor::Webhook)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn remote_payment_without_local_order_is_not_found() {
    let h = Harness::new();
    h.gateway.put_payment(remote_payment(
        "1005",
        RemotePaymentStatus::Approved,
        Some("ORD-someone-else-0000000000000000"),
    ));
    let err = h
        .engine
        .pipeline
        .handle(&notification("payment", "1005"), Actor::Webhook)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn unrecognized_notifications_are_acknowledged_without_fetching() {
    let h = Harness::new();
    let n = serde_json::from_value(serde_json::json!({
        "type": "merchant_order",
        "action": "merchant_order.updated",
        "data": { "id": "77" },
    }))
    .unwrap();
    let result = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert_eq!(result, ProcessResult::Ignored("unrecognized".into()));
    assert_eq!(h.gateway.read_count(), 0);
}

// ── Gateway failures ───────────────────────────────────────────────────────
// A timeout or 5xx must surface as retryable, never as "not found", and must
// leave the record untouched.

#[tokio::test]
async fn hanging_gateway_is_transient_not_missing() {
    let h = Harness::new();
    let order = h.pending_order("edu").await;
    h.gateway.put_payment(remote_payment(
        "1006",
        RemotePaymentStatus::Approved,
        Some(&order.reference),
    ));
    h.gateway.set_mode(GatewayMode::Hang);

    let err = h
        .engine
        .pipeline
        .handle(&notification("payment", "1006"), Actor::Webhook)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Transient(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert_eq!(h.gateway.read_count(), 2, "one read per retry attempt");
    let stored = h.engine.orders.get(order.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(h.store.lock_count(), 0);
}

#[tokio::test]
async fn unavailable_gateway_recovers_on_redelivery() {
    let h = Harness::new();
    let order = h.pending_order("fabi").await;
    h.gateway.put_payment(remote_payment(
        "1007",
        RemotePaymentStatus::Approved,
        Some(&order.reference),
    ));
    let n = notification("payment", "1007");

    h.gateway.set_mode(GatewayMode::Unavailable);
    let err = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transient(_)));

    h.gateway.set_mode(GatewayMode::Normal);
    let result = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert_eq!(result.status(), "updated");
}

// ── Subscriptions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn authorized_preapproval_activates_subscription() {
    let h = Harness::new();
    let (id, _, _) = active_subscription(&h, "gabi").await;

    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.activation_source, Some(ActivationSource::Webhook));
    assert!(record.activated_at.is_some());
    assert!(record.next_billing_at.is_some(), "first billing date derived from cadence");
    assert_eq!(h.email.count(TemplateKind::SubscriptionActivated), 1);
}

#[tokio::test]
async fn pending_preapproval_after_activation_is_an_anomaly() {
    let h = Harness::new();
    let (id, _, remote_id) = active_subscription(&h, "hugo").await;

    h.gateway
        .set_subscription_status(&remote_id, RemoteSubscriptionStatus::Pending);
    let result = h
        .engine
        .pipeline
        .handle(&notification("subscription_preapproval", &remote_id), Actor::Webhook)
        .await
        .unwrap();

    assert_eq!(result.status(), "anomaly");
    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
}

async fn deliver_preapproval(
    h: &Harness,
    remote_id: &str,
    status: RemoteSubscriptionStatus,
) -> ProcessResult {
    h.gateway.set_subscription_status(remote_id, status);
    h.engine
        .pipeline
        .handle(&notification("subscription_preapproval", remote_id), Actor::Webhook)
        .await
        .unwrap()
}

#[tokio::test]
async fn pause_and_resume_cycles_are_all_applied() {
    let h = Harness::new();
    let (id, _, remote_id) = active_subscription(&h, "lara").await;
    let activated_at = h.engine.subscriptions.get(id).await.unwrap().activated_at;

    for _ in 0..2 {
        let paused = deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Paused).await;
        assert_eq!(paused.status(), "updated");
        let record = h.engine.subscriptions.get(id).await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Paused);

        let resumed =
            deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Authorized).await;
        assert_eq!(resumed.status(), "updated");
        let record = h.engine.subscriptions.get(id).await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
    }

    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.activated_at, activated_at, "resume keeps the first activation");
    assert_eq!(status_changes(&h), 5);
    assert_eq!(h.email.count(TemplateKind::SubscriptionActivated), 1);
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn resume_redelivery_is_a_duplicate() {
    let h = Harness::new();
    let (_, _, remote_id) = active_subscription(&h, "leo").await;
    deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Paused).await;
    deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Authorized).await;

    let again = h
        .engine
        .pipeline
        .handle(&notification("subscription_preapproval", &remote_id), Actor::Webhook)
        .await
        .unwrap();
    assert_eq!(again.status(), "duplicate");
    assert_eq!(status_changes(&h), 3);
}

#[tokio::test]
async fn pause_and_resume_apply_without_gateway_stamps() {
    let h = Harness::new();
    h.gateway.omit_last_modified(true);
    let (id, _, remote_id) = active_subscription(&h, "lia").await;

    deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Paused).await;
    let resumed = deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Authorized).await;

    assert_eq!(resumed.status(), "updated");
    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn paused_subscription_can_be_cancelled() {
    let h = Harness::new();
    let (id, _, remote_id) = active_subscription(&h, "luca").await;
    deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Paused).await;

    let cancelled =
        deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Cancelled).await;
    assert_eq!(cancelled.status(), "updated");
    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Cancelled);
    assert_eq!(h.email.count(TemplateKind::SubscriptionCancelled), 1);

    let late = deliver_preapproval(&h, &remote_id, RemoteSubscriptionStatus::Authorized).await;
    assert_eq!(late.status(), "anomaly");
    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Cancelled);
    assert_eq!(h.email.count(TemplateKind::SubscriptionActivated), 1);
}

#[tokio::test]
async fn second_activation_for_same_plan_is_logged_as_anomaly() {
    let h = Harness::new();
    let (first, _, _) = active_subscription(&h, "mia").await;

    // A second intent for the same plan that bypassed subscribe, e.g. created
    // by hand in the gateway dashboard.
    let second = NewSubscription {
        id: uuid::Uuid::now_v7(),
        owner_id: "mia".into(),
        owner_email: "mia@example.com".into(),
        plan_id: "gold".into(),
        external_reference: "SUB-mia-gold-dashboard".into(),
        cadence: BillingCadence::monthly(),
        pricing: Pricing::new(MoneyAmount::new(2990).unwrap(), 0).unwrap(),
        currency: Currency::Brl,
    };
    assert!(h.store.insert_subscription(&second).await.unwrap());
    h.gateway.put_subscription(RemoteSubscription {
        id: RemoteId::new("pre-dashboard").unwrap(),
        status: RemoteSubscriptionStatus::Authorized,
        external_reference: Some(second.external_reference.clone()),
        next_payment_at: None,
        cadence: Some(BillingCadence::monthly()),
        money: None,
        last_modified: Some(Utc::now()),
    });

    let result = h
        .engine
        .pipeline
        .handle(&notification("subscription_preapproval", "pre-dashboard"), Actor::Webhook)
        .await
        .unwrap();

    assert_eq!(result.status(), "anomaly");
    let stored = h.engine.subscriptions.get(second.id).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Pending);
    let anomaly = h
        .store
        .sync_log()
        .into_iter()
        .find(|e| e.entity_id == second.id && e.action == "anomaly")
        .expect("rejected activation is logged");
    assert_eq!(anomaly.detail["incoming_status"], "active");
    assert!(anomaly.detail["reason"].as_str().is_some());

    let first = h.engine.subscriptions.get(first).await.unwrap();
    assert_eq!(first.status, SubscriptionStatus::Active);
    assert_eq!(h.email.count(TemplateKind::SubscriptionActivated), 1);
}

#[tokio::test]
async fn recurring_charge_advances_billing_once() {
    let h = Harness::new();
    let (id, reference, remote_id) = active_subscription(&h, "iris").await;

    let mut charge = remote_payment("2001", RemotePaymentStatus::Approved, Some(&reference));
    charge.subscription_id = Some(RemoteId::new(remote_id.as_str()).unwrap());
    let billed_at = Utc::now();
    charge.approved_at = Some(billed_at);
    h.gateway.put_payment(charge);

    let n = notification("subscription_authorized_payment", "2001");
    let first = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert!(matches!(
        first,
        ProcessResult::Reconciled(ReconcileOutcome::BillingRecorded { .. })
    ));

    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert_eq!(record.last_billing_at, Some(billed_at));
    assert_eq!(record.next_billing_at, record.cadence.advance(billed_at));

    let again = h.engine.pipeline.handle(&n, Actor::Webhook).await.unwrap();
    assert_eq!(again.status(), "duplicate");
    assert_eq!(h.email.count(TemplateKind::RenewalReceipt), 1);
}

#[tokio::test]
async fn payment_envelope_for_subscription_charge_is_rerouted() {
    let h = Harness::new();
    let (id, reference, _) = active_subscription(&h, "joao").await;

    // Plain "payment" envelope; only the SUB- reference marks it recurring.
    h.gateway.put_payment(remote_payment(
        "2002",
        RemotePaymentStatus::Approved,
        Some(&reference),
    ));
    let result = h
        .engine
        .pipeline
        .handle(&notification("payment", "2002"), Actor::Webhook)
        .await
        .unwrap();

    assert_eq!(result.status(), "billing_recorded");
    let record = h.engine.subscriptions.get(id).await.unwrap();
    assert!(record.last_billing_at.is_some());
}

// ── Staleness sweep ────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_activates_subscription_whose_webhook_never_arrived() {
    let h = Harness::new();
    let SubscribeOutcome::Created {
        subscription_id,
        remote_subscription_id,
        ..
    } = h.subscribe("kai", "gold").await
    else {
        panic!("expected Created");
    };
    h.gateway
        .set_subscription_status(&remote_subscription_id, RemoteSubscriptionStatus::Authorized);
    h.store
        .backdate_subscription(subscription_id, Utc::now() - chrono::Duration::hours(1));

    let threshold = std::time::Duration::from_secs(30 * 60);
    let report = h.engine.sweeper.sweep(threshold).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.reconciled, 1);

    let record = h.engine.subscriptions.get(subscription_id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.activation_source, Some(ActivationSource::Sweep));
    assert!(h
        .store
        .sync_log()
        .iter()
        .any(|e| e.actor == Actor::Sweep && e.action == "status_changed"));

    let second = h.engine.sweeper.sweep(threshold).await.unwrap();
    assert_eq!(second.scanned, 0, "active records are not stale");
}

#[tokio::test]
async fn sweep_skips_fresh_records() {
    let h = Harness::new();
    h.subscribe("lia", "gold").await;
    h.pending_order("lia").await;

    let report = h
        .engine
        .sweeper
        .sweep(std::time::Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.gateway.read_count(), 0);
}

#[tokio::test]
async fn sweep_confirms_linked_order_and_skips_unlinked_one() {
    let h = Harness::new();
    let linked = h.pending_order("mel").await;
    let unlinked = h.pending_order("nina").await;
    let hour_ago = Utc::now() - chrono::Duration::hours(1);

    h.store.link_remote_payment(linked.id, "3001");
    h.store.backdate_payment(linked.id, hour_ago);
    h.store.backdate_payment(unlinked.id, hour_ago);
    h.gateway.put_payment(remote_payment(
        "3001",
        RemotePaymentStatus::Approved,
        Some(&linked.reference),
    ));

    let report = h
        .engine
        .sweeper
        .sweep(std::time::Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.skipped, 1);

    let stored = h.engine.orders.get(linked.id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Confirmed);
    assert_eq!(h.email.count(TemplateKind::PaymentConfirmed), 1);
}

#[tokio::test]
async fn sweep_marks_vanished_remote_subscription_as_error() {
    let h = Harness::new();
    let SubscribeOutcome::Created {
        subscription_id,
        remote_subscription_id,
        ..
    } = h.subscribe("otto", "gold").await
    else {
        panic!("expected Created");
    };
    h.store
        .backdate_subscription(subscription_id, Utc::now() - chrono::Duration::hours(2));
    h.gateway.forget_subscription(&remote_subscription_id);

    let report = h
        .engine
        .sweeper
        .sweep(std::time::Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(report.reconciled, 1);

    let record = h.engine.subscriptions.get(subscription_id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Error);
    assert_eq!(h.store.lock_count(), 0);
}

#[tokio::test]
async fn sweep_leaves_records_pending_when_gateway_hangs() {
    let h = Harness::new();
    let SubscribeOutcome::Created {
        subscription_id, ..
    } = h.subscribe("pia", "gold").await
    else {
        panic!("expected Created");
    };
    h.store
        .backdate_subscription(subscription_id, Utc::now() - chrono::Duration::hours(1));
    h.gateway.set_mode(GatewayMode::Hang);

    let report = h
        .engine
        .sweeper
        .sweep(std::time::Duration::from_secs(30 * 60))
        .await
        .unwrap();
    assert_eq!(report.errored, 1);

    let record = h.engine.subscriptions.get(subscription_id).await.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Pending, "timeout is not evidence of absence");
}
