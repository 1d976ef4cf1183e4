//! Client-facing and administrative endpoints. User identity arrives as
//! an `X-User-Id` header injected by the upstream auth proxy; admin
//! endpoints carry a bearer token checked in constant time.

use {
    super::api_errors::ApiError,
    crate::{
        AppState,
        domain::{document::Document, error::PayError},
        services::{
            payment_flow,
            refund_flow::{self, ActorIdentity},
            tier,
        },
    },
    axum::{
        Json,
        extract::{Multipart, Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    subtle::ConstantTimeEq,
    uuid::Uuid,
};

fn user_from_headers(headers: &HeaderMap) -> Result<Uuid, PayError> {
    headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(PayError::MissingAuthHeaders)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<ActorIdentity, PayError> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(PayError::Unauthorized)?;
    let token_matches: bool = token
        .as_bytes()
        .ct_eq(state.admin.token.as_bytes())
        .into();
    if !token_matches {
        return Err(PayError::Unauthorized);
    }
    Ok(ActorIdentity {
        id: state.admin.actor_id,
        email: state.admin.actor_email.clone(),
    })
}

fn source_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
}

// ── payments ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartPaymentRequest {
    pub amount: i64,
}

pub async fn start_payment(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<StartPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_from_headers(&headers)?;
    let started = payment_flow::start_payment(
        state.store.as_ref(),
        state.gateway.as_ref(),
        user_id,
        document_id,
        request.amount,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "payment_id": started.payment.id,
            "checkout_url": started.checkout_url,
            "public_code": started.payment.public_code,
            "expires_at": started.expires_at,
            "status": started.payment.status,
        })),
    ))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_from_headers(&headers)?;
    let view = payment_flow::payment_status(
        state.store.as_ref(),
        state.gateway.as_ref(),
        user_id,
        document_id,
    )
    .await?;

    Ok(Json(json!({
        "status": view.status,
        "unlocked": view.unlocked,
        "payment_id": view.payment.as_ref().map(|p| p.id),
    })))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_from_headers(&headers)?;
    let payment =
        payment_flow::cancel_payment(state.store.as_ref(), user_id, document_id).await?;
    Ok(Json(json!({
        "payment_id": payment.id,
        "status": payment.status,
    })))
}

// ── refunds ────────────────────────────────────────────────────────────

fn refund_view(document: &Document) -> Value {
    json!({
        "document_id": document.id,
        "refund_requested": document.refund_requested,
        "requested_at": document.refund_requested_at,
        "motive": document.rejection_reason,
        "evidence_ref": document.evidence_ref,
        "resubmission": !document.refund_history.is_empty(),
    })
}

pub async fn request_refund(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_from_headers(&headers)?;

    let mut reason: Option<String> = None;
    let mut evidence_ref: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PayError::Validation(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("reason") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| PayError::Validation(format!("invalid reason field: {e}")))?;
                reason = Some(text);
            }
            Some("evidence") => {
                // Blob storage is outside this subsystem; keep the
                // reference so the admin can locate the upload.
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| PayError::Validation(format!("invalid evidence field: {e}")))?;
                if !bytes.is_empty() {
                    evidence_ref =
                        Some(format!("upload://{}", filename.unwrap_or_else(|| "evidence".into())));
                }
            }
            _ => {}
        }
    }

    let reason = reason.ok_or_else(|| PayError::Validation("refund reason is required".into()))?;
    let document = refund_flow::request_refund(
        state.store.as_ref(),
        user_id,
        document_id,
        &reason,
        evidence_ref.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(refund_view(&document))))
}

pub async fn refund_eligibility(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<refund_flow::Eligibility>, ApiError> {
    user_from_headers(&headers)?;
    let eligibility = refund_flow::refund_eligibility(state.store.as_ref(), document_id).await?;
    Ok(Json(eligibility))
}

// ── users ──────────────────────────────────────────────────────────────

pub async fn user_quota(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<tier::QuotaView>, ApiError> {
    let requester = user_from_headers(&headers)?;
    if requester != user_id {
        return Err(PayError::Validation("quota is only visible to its owner".into()).into());
    }
    let user = state
        .store
        .user(user_id)
        .await?
        .ok_or_else(|| PayError::NotFound(format!("user {user_id}")))?;
    Ok(Json(tier::quota_for(&user)))
}

pub async fn user_payments(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let requester = user_from_headers(&headers)?;
    if requester != user_id {
        return Err(
            PayError::Validation("payment history is only visible to its owner".into()).into(),
        );
    }
    let payments = state.store.payments_for_user(user_id).await?;
    Ok(Json(json!({ "payments": payments })))
}

// ── admin ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub comment: Option<String>,
}

async fn decide(
    state: &AppState,
    headers: &HeaderMap,
    document_id: Uuid,
    approve: bool,
    request: DecisionRequest,
) -> Result<Json<Value>, ApiError> {
    let actor = require_admin(state, headers)?;
    let comment = request.comment.unwrap_or_default();
    let outcome = refund_flow::decide_refund(
        state.store.as_ref(),
        document_id,
        approve,
        &comment,
        &actor,
        source_ip(headers),
    )
    .await?;

    Ok(Json(json!({
        "approved": approve,
        "document_id": outcome.document.id,
        "payment_id": outcome.payment.id,
        "payment_status": outcome.payment.status,
        "refunded_at": outcome.payment.refunded_at,
        "unlocked": outcome.document.unlocked,
        "can_resubmit": !approve,
    })))
}

pub async fn approve_refund(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    decide(&state, &headers, document_id, true, request).await
}

pub async fn reject_refund(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    decide(&state, &headers, document_id, false, request).await
}

pub async fn pending_refunds(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    let documents = refund_flow::pending_requests(state.store.as_ref()).await?;
    let items: Vec<Value> = documents
        .iter()
        .map(|d| {
            json!({
                "document_id": d.id,
                "user_id": d.user_id,
                "kind": d.kind,
                "requested_at": d.refund_requested_at,
                "motive": d.rejection_reason,
                "evidence_ref": d.evidence_ref,
                "previous_decisions": d.refund_history.len(),
            })
        })
        .collect();
    Ok(Json(json!({"total": items.len(), "requests": items})))
}

#[derive(Debug, Deserialize)]
pub struct SimulatePaymentRequest {
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub amount: i64,
}

pub async fn simulate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SimulatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = require_admin(&state, &headers)?;
    let payment = payment_flow::create_simulated_payment(
        state.store.as_ref(),
        request.user_id,
        request.document_id,
        request.amount,
    )
    .await?;

    crate::services::audit::record(
        state.store.as_ref(),
        crate::domain::audit::NewAuditEntry::new(
            actor.id,
            &actor.email,
            crate::domain::audit::AuditAction::AdminUnlock,
            "document",
            Some(request.document_id),
            json!({
                "payment_id": payment.id,
                "amount": payment.amount,
                "simulated": true,
            }),
            source_ip(&headers),
        ),
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "payment": payment }))))
}

// ── gateway diagnostics ────────────────────────────────────────────────

pub async fn gateway_webhook_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    let config = state.gateway.webhook_config().await?;
    let payment_enabled = config.configured_categories.iter().any(|c| c == "payment");
    Ok(Json(json!({
        "webhook_url": config.webhook_url,
        "configured_categories": config.configured_categories,
        "available_categories": config.available_categories,
        // Without the payment category the gateway never delivers
        // payment webhooks; surface it so the operator notices.
        "payment_category_enabled": payment_enabled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebhookConfigRequest {
    pub webhook_url: String,
    pub categories: Option<Vec<String>>,
}

pub async fn update_gateway_webhook_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateWebhookConfigRequest>,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    let categories = request.categories.unwrap_or_else(|| vec!["payment".into()]);
    let config = state
        .gateway
        .update_webhook_config(&request.webhook_url, &categories)
        .await?;
    Ok(Json(json!({
        "webhook_url": config.webhook_url,
        "configured_categories": config.configured_categories,
    })))
}

pub async fn gateway_recent_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin(&state, &headers)?;
    let events = state.gateway.recent_events().await?;
    let items: Vec<Value> = events
        .iter()
        .map(|e| {
            json!({
                "event_type": e.event_type,
                "created_at": e.created_at,
                "payload": e.payload,
            })
        })
        .collect();
    Ok(Json(json!({"total": items.len(), "events": items})))
}
