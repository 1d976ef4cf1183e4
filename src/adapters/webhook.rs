//! Inbound webhook endpoint. Authentication failures and malformed bodies
//! get their real status codes (401/400); once a delivery is authentic,
//! internal failures are masked as 200 so the gateway never enters a
//! retry storm over a bug on our side — the failure is error-logged with
//! full context for operator follow-up instead.

use {
    crate::{
        AppState,
        adapters::{api_errors::ApiError, signing},
        domain::{error::PayError, event::WebhookEnvelope},
        services::payment_flow::{self, EventDisposition},
    },
    axum::{
        Json,
        extract::State,
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    serde_json::{Value, json},
};

/// GET probe: the gateway checks the URL is alive before enabling it.
pub async fn liveness() -> Json<Value> {
    Json(json!({"status": "ok", "message": "webhook endpoint active"}))
}

#[tracing::instrument(
    name = "gateway_webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    // Body first: an unparseable delivery can never be verified.
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "webhook body is not valid JSON");
            return ApiError::from(PayError::MalformedEventBody(e.to_string())).into_response();
        }
    };

    let signature = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(signing::extract_signature);
    let Some(signature) = signature else {
        tracing::warn!("webhook missing or malformed Authorization header");
        return ApiError::from(PayError::MissingAuthHeaders).into_response();
    };
    let Some(x_date) = headers.get("X-Date").and_then(|v| v.to_str().ok()) else {
        tracing::warn!("webhook missing X-Date header");
        return ApiError::from(PayError::MissingAuthHeaders).into_response();
    };

    let config = &state.gateway_config;
    if !signing::verify_webhook_signature(
        &config.secret,
        &config.login,
        x_date,
        &parsed,
        signature,
    ) {
        tracing::warn!("webhook signature verification failed");
        return ApiError::from(PayError::InvalidSignature).into_response();
    }

    let envelope = WebhookEnvelope::parse(&parsed);
    tracing::Span::current()
        .record(
            "event_id",
            tracing::field::display(envelope.event_id.as_deref().unwrap_or("-")),
        )
        .record("event_type", tracing::field::display(&envelope.event_type));

    match payment_flow::apply_event(state.store.as_ref(), &envelope).await {
        Ok(EventDisposition::Settled(payment)) => Json(json!({
            "status": "processed",
            "payment_id": payment.id,
            "result": payment.status,
        }))
        .into_response(),
        Ok(EventDisposition::AlreadyProcessed(payment)) => Json(json!({
            "status": "already_processed",
            "payment_id": payment.id,
        }))
        .into_response(),
        Ok(EventDisposition::Ignored) => Json(json!({
            "status": "ignored",
            "event_type": envelope.event_type,
        }))
        .into_response(),
        Ok(EventDisposition::Orphaned) => Json(json!({
            "status": "orphaned",
            "event_id": envelope.event_id,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(
                error = %e,
                event_id = ?envelope.event_id,
                event_type = %envelope.event_type,
                "webhook processing failed; acknowledging to prevent gateway retries"
            );
            Json(json!({"status": "error"})).into_response()
        }
    }
}
