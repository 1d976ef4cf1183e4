//! Payment lifecycle orchestration. Both the webhook receiver and the
//! reconciliation poller funnel into the same settlement entry points;
//! whichever lands first performs the real transition.

use {
    crate::adapters::gateway::Gateway,
    crate::domain::{
        error::PayError,
        event::{EventRef, GatewayEvent, PaymentOutcome, WebhookEnvelope},
        payment::{NewPayment, Payment, PaymentMethod, PaymentStatus},
    },
    crate::infra::store::{Settlement, Store},
    chrono::Utc,
    uuid::Uuid,
};

#[derive(Debug)]
pub struct StartedPayment {
    pub payment: Payment,
    pub checkout_url: String,
    pub expires_at: Option<String>,
}

/// Create a local `Pending` payment backed by a fresh gateway order.
pub async fn start_payment(
    store: &dyn Store,
    gateway: &dyn Gateway,
    user_id: Uuid,
    document_id: Uuid,
    amount: i64,
) -> Result<StartedPayment, PayError> {
    if amount <= 0 {
        return Err(PayError::Validation("amount must be positive".into()));
    }
    let document = store
        .document(document_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
    if document.user_id != user_id {
        return Err(PayError::Validation(
            "document does not belong to this user".into(),
        ));
    }
    if document.unlocked {
        return Err(PayError::Validation("document is already unlocked".into()));
    }
    // Fast rejection before spending a gateway round-trip; the store's
    // uniqueness constraint remains the authoritative check.
    if store
        .pending_payment_for_document(document_id)
        .await?
        .is_some()
    {
        return Err(PayError::DuplicatePendingPayment);
    }

    let order = gateway.create_order(amount, document_id, document.kind).await?;

    let new = NewPayment::new(
        user_id,
        document_id,
        amount,
        PaymentMethod::Gateway,
        Some(order.order_id.clone()),
        Some(order.public_code.clone()),
    );
    let payment = store.create_payment(&new).await?;

    tracing::info!(
        payment_id = %payment.id,
        document_id = %document_id,
        public_code = %order.public_code,
        amount,
        "payment started"
    );
    Ok(StartedPayment {
        payment,
        checkout_url: order.checkout_url,
        expires_at: order.expires_at,
    })
}

/// What applying one gateway event did.
#[derive(Debug)]
pub enum EventDisposition {
    /// The event performed the real transition.
    Settled(Payment),
    /// The payment was already past `Pending`; no mutation.
    AlreadyProcessed(Payment),
    /// Recognized event with nothing to do (informational kinds).
    Ignored,
    /// No matching payment; acknowledged so the gateway stops retrying.
    Orphaned,
}

/// Find the payment an event points at: gateway public order code first,
/// then transaction reference, then a document id embedded in the order
/// description (in which case only a pending payment qualifies).
async fn locate_payment(
    store: &dyn Store,
    reference: &EventRef,
) -> Result<Option<Payment>, PayError> {
    if let Some(code) = reference.public_code.as_deref()
        && let Some(payment) = store.payment_by_public_code(code).await?
    {
        return Ok(Some(payment));
    }
    if let Some(txn) = reference.transaction_ref.as_deref()
        && let Some(payment) = store.payment_by_transaction_ref(txn).await?
    {
        return Ok(Some(payment));
    }
    if let Some(document_id) = reference.document_id
        && let Some(payment) = store.pending_payment_for_document(document_id).await?
    {
        return Ok(Some(payment));
    }
    Ok(None)
}

/// Apply one verified webhook event. Idempotent: a redelivery of an
/// already-applied event reports `AlreadyProcessed` without touching
/// state (this is what keeps bonus credits from being granted twice).
pub async fn apply_event(
    store: &dyn Store,
    envelope: &WebhookEnvelope,
) -> Result<EventDisposition, PayError> {
    let Some(reference) = envelope.event.reference() else {
        tracing::info!(
            event_type = %envelope.event_type,
            "unclassified gateway event, nothing to apply"
        );
        return Ok(EventDisposition::Ignored);
    };

    let Some(payment) = locate_payment(store, reference).await? else {
        tracing::warn!(
            event_id = ?envelope.event_id,
            event_type = %envelope.event_type,
            "orphaned gateway event, no matching payment"
        );
        return Ok(EventDisposition::Orphaned);
    };

    if matches!(
        payment.status,
        PaymentStatus::Success | PaymentStatus::Refunded
    ) {
        tracing::info!(
            payment_id = %payment.id,
            status = %payment.status,
            "event for already-processed payment, ignoring"
        );
        return Ok(EventDisposition::AlreadyProcessed(payment));
    }

    match envelope.event.outcome() {
        PaymentOutcome::Paid => {
            // Settlement time is when we processed the confirmation, not
            // the event's own timestamp; the tier window counts from it.
            let settlement = store
                .settle_success(payment.id, reference.transaction_ref.as_deref(), Utc::now())
                .await?;
            Ok(report_settlement(settlement, &envelope.event_type, "paid"))
        }
        PaymentOutcome::Closed(status) => {
            let note = format!("failed via webhook: {status} - {}", envelope.event_type);
            let settlement = store.settle_failure(payment.id, &note).await?;
            Ok(report_settlement(settlement, &envelope.event_type, &status))
        }
        PaymentOutcome::None => Ok(EventDisposition::Ignored),
    }
}

fn report_settlement(
    settlement: Settlement,
    event_type: &str,
    incoming: &str,
) -> EventDisposition {
    match settlement {
        Settlement::Applied(payment) => {
            tracing::info!(
                payment_id = %payment.id,
                status = %payment.status,
                event_type,
                "payment settled"
            );
            EventDisposition::Settled(payment)
        }
        Settlement::AlreadySettled(payment) => {
            tracing::warn!(
                payment_id = %payment.id,
                current = %payment.status,
                incoming,
                event_type,
                "event lost the settlement race, no state change"
            );
            EventDisposition::AlreadyProcessed(payment)
        }
    }
}

#[derive(Debug)]
pub struct StatusView {
    pub status: Option<PaymentStatus>,
    pub unlocked: bool,
    pub payment: Option<Payment>,
}

/// Current payment status for a document. While the latest payment is
/// still pending with a known public code, pull the gateway's event feed
/// to catch a missed webhook; a gateway failure here degrades to the
/// local state instead of failing the status request.
pub async fn payment_status(
    store: &dyn Store,
    gateway: &dyn Gateway,
    user_id: Uuid,
    document_id: Uuid,
) -> Result<StatusView, PayError> {
    let document = store
        .document(document_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
    if document.user_id != user_id {
        return Err(PayError::Validation(
            "document does not belong to this user".into(),
        ));
    }

    let mut payment = store.latest_payment_for_document(document_id).await?;

    let pending = payment
        .as_ref()
        .filter(|p| p.status == PaymentStatus::Pending && p.public_code.is_some())
        .cloned();
    if let Some(pending) = pending {
        match reconcile_pending(store, gateway, &pending).await {
            Ok(Some(updated)) => payment = Some(updated),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    payment_id = %pending.id,
                    error = %e,
                    "reconciliation poll failed, returning local state"
                );
            }
        }
    }

    // Re-read: reconciliation may have unlocked the document.
    let document = store
        .document(document_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;

    Ok(StatusView {
        status: payment.as_ref().map(|p| p.status),
        unlocked: document.unlocked,
        payment,
    })
}

/// Scan the gateway event feed for an event matching this pending payment
/// and apply it through the normal settlement path.
async fn reconcile_pending(
    store: &dyn Store,
    gateway: &dyn Gateway,
    payment: &Payment,
) -> Result<Option<Payment>, PayError> {
    let Some(public_code) = payment.public_code.as_deref() else {
        return Ok(None);
    };
    let events = gateway.recent_events().await?;

    for event in events {
        let classified = GatewayEvent::classify(&event.event_type, &event.payload);
        let Some(reference) = classified.reference() else {
            continue;
        };
        let matched = reference.public_code.as_deref() == Some(public_code)
            || reference.document_id == Some(payment.document_id);
        if !matched {
            continue;
        }

        match classified.outcome() {
            PaymentOutcome::Paid => {
                let settlement = store
                    .settle_success(payment.id, reference.transaction_ref.as_deref(), Utc::now())
                    .await?;
                tracing::info!(
                    payment_id = %payment.id,
                    event_type = %event.event_type,
                    "pending payment reconciled from event feed"
                );
                return Ok(Some(settlement.payment().clone()));
            }
            PaymentOutcome::Closed(status) => {
                let note = format!("failed via reconciliation: {status} - {}", event.event_type);
                let settlement = store.settle_failure(payment.id, &note).await?;
                tracing::info!(
                    payment_id = %payment.id,
                    event_type = %event.event_type,
                    status = %status,
                    "pending payment closed from event feed"
                );
                return Ok(Some(settlement.payment().clone()));
            }
            PaymentOutcome::None => continue,
        }
    }
    Ok(None)
}

/// User-requested cancellation of a pending payment, freeing the document
/// for a fresh attempt.
pub async fn cancel_payment(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
) -> Result<Payment, PayError> {
    let document = store
        .document(document_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
    if document.user_id != user_id {
        return Err(PayError::Validation(
            "document does not belong to this user".into(),
        ));
    }
    let pending = store
        .pending_payment_for_document(document_id)
        .await?
        .ok_or_else(|| PayError::Validation("no pending payment to cancel".into()))?;

    let settlement = store
        .settle_failure(pending.id, "cancelled at user request")
        .await?;
    Ok(settlement.payment().clone())
}

/// Development-mode payment: settles immediately through the standard
/// path, so unlock, tier and bonus behave exactly like a gateway payment.
pub async fn create_simulated_payment(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
    amount: i64,
) -> Result<Payment, PayError> {
    if amount <= 0 {
        return Err(PayError::Validation("amount must be positive".into()));
    }
    let document = store
        .document(document_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
    if document.user_id != user_id {
        return Err(PayError::Validation(
            "document does not belong to this user".into(),
        ));
    }

    let new = NewPayment::new(
        user_id,
        document_id,
        amount,
        PaymentMethod::Simulated,
        None,
        None,
    );
    let payment = store.create_payment(&new).await?;
    let transaction_ref = format!("SIM-{}", payment.id);
    let settlement = store
        .settle_success(payment.id, Some(&transaction_ref), Utc::now())
        .await?;
    Ok(settlement.payment().clone())
}
