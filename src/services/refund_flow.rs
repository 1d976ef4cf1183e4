use {
    super::audit,
    crate::domain::{
        audit::{AuditAction, NewAuditEntry},
        document::{Document, RefundDecision},
        error::PayError,
    },
    crate::infra::store::{RefundOutcome, Store},
    serde::Serialize,
    serde_json::json,
    uuid::Uuid,
};

/// Authenticated administrator, carried into the audit trail.
#[derive(Debug, Clone)]
pub struct ActorIdentity {
    pub id: Uuid,
    pub email: String,
}

/// Open a refund request on an unlocked, paid document. A previous
/// rejection does not block resubmission.
pub async fn request_refund(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
    reason: &str,
    evidence_ref: Option<&str>,
) -> Result<Document, PayError> {
    if reason.trim().is_empty() {
        return Err(PayError::Validation("refund reason is required".into()));
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

    let document = store
        .open_refund_request(document_id, reason.trim(), evidence_ref)
        .await?;
    tracing::info!(
        document_id = %document_id,
        resubmission = !document.refund_history.is_empty(),
        "refund requested"
    );
    Ok(document)
}

#[derive(Debug, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: String,
}

/// Pre-check mirroring the conditions `open_refund_request` enforces.
pub async fn refund_eligibility(
    store: &dyn Store,
    document_id: Uuid,
) -> Result<Eligibility, PayError> {
    let Some(document) = store.document(document_id).await? else {
        return Ok(Eligibility {
            eligible: false,
            reason: "document not found".into(),
        });
    };
    if !document.unlocked {
        return Ok(Eligibility {
            eligible: false,
            reason: "document is not unlocked".into(),
        });
    }
    if document.refund_requested {
        return Ok(Eligibility {
            eligible: false,
            reason: "a refund request is already pending".into(),
        });
    }
    if store
        .successful_payment_for_document(document_id)
        .await?
        .is_none()
    {
        return Ok(Eligibility {
            eligible: false,
            reason: "no successful payment found for this document".into(),
        });
    }
    Ok(Eligibility {
        eligible: true,
        reason: "ok".into(),
    })
}

/// Admin decision on a pending refund request. The decision itself is
/// transactional in the store; the audit entries are best-effort and
/// never roll the decision back.
pub async fn decide_refund(
    store: &dyn Store,
    document_id: Uuid,
    approve: bool,
    admin_comment: &str,
    actor: &ActorIdentity,
    source_ip: Option<String>,
) -> Result<RefundOutcome, PayError> {
    let decision = if approve {
        RefundDecision::Approved
    } else {
        RefundDecision::Rejected
    };
    let outcome = store
        .apply_refund_decision(document_id, decision, admin_comment)
        .await?;

    let action = if approve {
        AuditAction::ApproveRefund
    } else {
        AuditAction::RejectRefund
    };
    audit::record(
        store,
        NewAuditEntry::new(
            actor.id,
            &actor.email,
            action,
            "document",
            Some(document_id),
            json!({
                "decision": decision.as_str(),
                "comment": admin_comment,
                "payment_id": outcome.payment.id,
            }),
            source_ip.clone(),
        ),
    )
    .await;

    if approve {
        // The approval also moves money; record that against the payment.
        audit::record(
            store,
            NewAuditEntry::new(
                actor.id,
                &actor.email,
                AuditAction::ProcessRefund,
                "payment",
                Some(outcome.payment.id),
                json!({
                    "amount": outcome.payment.amount,
                    "document_id": document_id,
                    "refunded_at": outcome.payment.refunded_at,
                }),
                source_ip,
            ),
        )
        .await;
    }

    tracing::info!(
        document_id = %document_id,
        decision = %decision,
        payment_id = %outcome.payment.id,
        "refund decided"
    );
    Ok(outcome)
}

pub async fn pending_requests(store: &dyn Store) -> Result<Vec<Document>, PayError> {
    store.documents_with_pending_refund().await
}
