mod common;

use {
    common::*,
    lexpay::domain::{
        error::PayError,
        event::WebhookEnvelope,
        payment::{PaymentMethod, PaymentStatus},
        user::Tier,
    },
    lexpay::infra::store::Store,
    lexpay::services::payment_flow::{self, EventDisposition},
    serde_json::json,
};

// ── order creation ─────────────────────────────────────────────────────

#[tokio::test]
async fn start_payment_creates_pending_with_gateway_refs() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;

    let started = payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap();

    assert_eq!(started.payment.status, PaymentStatus::Pending);
    assert_eq!(started.payment.method, PaymentMethod::Gateway);
    assert_eq!(started.payment.amount, 39000);
    assert!(started.payment.public_code.is_some());
    assert!(started.checkout_url.starts_with("https://gateway.test/checkout/"));
}

#[tokio::test]
async fn second_pending_payment_is_rejected() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;

    payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap();

    let err = payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PayError::DuplicatePendingPayment));
}

#[tokio::test]
async fn gateway_down_surfaces_unavailable_and_creates_nothing() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    app.gateway.set_orders_down(true);

    let err = payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PayError::GatewayUnavailable(_)));

    let latest = app
        .store
        .latest_payment_for_document(document.id)
        .await
        .unwrap();
    assert!(latest.is_none(), "no payment row without a gateway order");
}

#[tokio::test]
async fn cancel_frees_the_document_for_a_fresh_attempt() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;

    payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap();

    let cancelled = payment_flow::cancel_payment(app.store.as_ref(), user.id, document.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, PaymentStatus::Failed);
    assert_eq!(
        cancelled.admin_note.as_deref(),
        Some("cancelled at user request")
    );

    // A new order is accepted now.
    payment_flow::start_payment(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
        39000,
    )
    .await
    .unwrap();
}

// ── Scenario C: reconciliation poll ────────────────────────────────────

#[tokio::test]
async fn poll_applies_denied_event_from_feed() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    let payment = seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-poll").await;

    app.gateway.push_event(
        "payment_order.denied",
        json!({"public_code": "pc-poll", "status": "denied"}),
    );

    let view = payment_flow::payment_status(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
    )
    .await
    .unwrap();

    assert_eq!(view.status, Some(PaymentStatus::Failed));
    assert!(!view.unlocked);

    let payment = app.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn poll_applies_paid_event_with_full_benefits() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-poll2").await;

    app.gateway.push_event(
        "transaction.completed",
        json!({"order": "pc-poll2", "id": 55, "status": "completed"}),
    );

    let view = payment_flow::payment_status(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
    )
    .await
    .unwrap();

    assert_eq!(view.status, Some(PaymentStatus::Success));
    assert!(view.unlocked);

    let user = app.store.user(user.id).await.unwrap().unwrap();
    assert_eq!(user.bonus_sessions_today, 2);
    assert_eq!(user.tier, Tier::Bronze);
}

#[tokio::test]
async fn poll_degrades_to_local_state_when_gateway_is_down() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-down").await;
    app.gateway.set_events_down(true);

    let view = payment_flow::payment_status(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
    )
    .await
    .unwrap();

    assert_eq!(view.status, Some(PaymentStatus::Pending));
    assert!(!view.unlocked);
}

#[tokio::test]
async fn poll_without_matching_event_stays_pending() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-none").await;

    app.gateway.push_event(
        "payment_order.paid",
        json!({"public_code": "pc-someone-else"}),
    );

    let view = payment_flow::payment_status(
        app.store.as_ref(),
        app.gateway.as_ref(),
        user.id,
        document.id,
    )
    .await
    .unwrap();
    assert_eq!(view.status, Some(PaymentStatus::Pending));
}

// ── forward-only ───────────────────────────────────────────────────────

#[tokio::test]
async fn settled_payment_ignores_conflicting_events() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    let payment =
        seed_settled_payment(app.store.as_ref(), user.id, document.id, "pc-fwd").await;
    assert_eq!(payment.status, PaymentStatus::Success);

    let envelope = WebhookEnvelope::parse(&json!({
        "event_type": "payment_order.denied",
        "data": {"public_code": "pc-fwd", "status": "denied"}
    }));
    let disposition = payment_flow::apply_event(app.store.as_ref(), &envelope)
        .await
        .unwrap();
    assert!(matches!(disposition, EventDisposition::AlreadyProcessed(_)));

    let payment = app.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success, "no regression");
}

#[tokio::test]
async fn failed_payment_does_not_resurrect_on_paid_event() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    let payment = seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-dead").await;
    app.store
        .settle_failure(payment.id, "cancelled at user request")
        .await
        .unwrap();

    let envelope = WebhookEnvelope::parse(&paid_webhook_body("pc-dead"));
    let disposition = payment_flow::apply_event(app.store.as_ref(), &envelope)
        .await
        .unwrap();
    assert!(matches!(disposition, EventDisposition::AlreadyProcessed(_)));

    let payment = app.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let document = app.store.document(document.id).await.unwrap().unwrap();
    assert!(!document.unlocked);
}

// ── concurrency: webhook redelivery races ──────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeliveries_settle_exactly_once() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;
    seed_pending_payment(app.store.as_ref(), user.id, document.id, "pc-race").await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = app.store.clone();
        handles.push(tokio::spawn(async move {
            let envelope = WebhookEnvelope::parse(&paid_webhook_body("pc-race"));
            payment_flow::apply_event(store.as_ref(), &envelope)
                .await
                .unwrap()
        }));
    }

    let mut settled = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            EventDisposition::Settled(_) => settled += 1,
            EventDisposition::AlreadyProcessed(_) => already += 1,
            other => panic!("unexpected disposition: {other:?}"),
        }
    }
    assert_eq!(settled, 1, "exactly one delivery performs the transition");
    assert_eq!(already, 9);

    let user = app.store.user(user.id).await.unwrap().unwrap();
    assert_eq!(user.bonus_sessions_today, 2, "bonus granted exactly once");
}

// ── simulated payments ─────────────────────────────────────────────────

#[tokio::test]
async fn simulated_payment_settles_through_the_standard_path() {
    let app = test_app();
    let user = seed_user(app.store.as_ref()).await;
    let document = seed_document(app.store.as_ref(), user.id).await;

    let payment = payment_flow::create_simulated_payment(
        app.store.as_ref(),
        user.id,
        document.id,
        25000,
    )
    .await
    .unwrap();

    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.method, PaymentMethod::Simulated);
    assert!(payment.transaction_ref.as_deref().unwrap().starts_with("SIM-"));

    let document = app.store.document(document.id).await.unwrap().unwrap();
    assert!(document.unlocked);
    let user = app.store.user(user.id).await.unwrap().unwrap();
    assert_eq!(user.tier, Tier::Bronze);
    assert_eq!(user.bonus_sessions_today, 2);
}
