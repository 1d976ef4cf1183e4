pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::gateway::{Gateway, GatewayConfig},
    axum::{
        Router,
        extract::DefaultBodyLimit,
        routing::{get, post},
    },
    infra::store::Store,
    std::sync::Arc,
    std::time::Duration,
    tower_http::timeout::TimeoutLayer,
    uuid::Uuid,
};

/// Operator identity behind the admin bearer token, attributed in the
/// audit log.
#[derive(Clone)]
pub struct AdminConfig {
    pub token: String,
    pub actor_id: Uuid,
    pub actor_email: String,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn Gateway>,
    pub gateway_config: Arc<GatewayConfig>,
    pub admin: Arc<AdminConfig>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/webhooks/gateway",
            get(adapters::webhook::liveness).post(adapters::webhook::receive),
        )
        .route(
            "/documents/{id}/payment/start",
            post(adapters::handlers::start_payment),
        )
        .route(
            "/documents/{id}/payment/status",
            get(adapters::handlers::payment_status),
        )
        .route(
            "/documents/{id}/payment/cancel",
            post(adapters::handlers::cancel_payment),
        )
        .route(
            "/documents/{id}/refund",
            post(adapters::handlers::request_refund),
        )
        .route(
            "/documents/{id}/refund/eligibility",
            get(adapters::handlers::refund_eligibility),
        )
        .route("/users/{id}/quota", get(adapters::handlers::user_quota))
        .route("/users/{id}/payments", get(adapters::handlers::user_payments))
        .route(
            "/admin/refunds/pending",
            get(adapters::handlers::pending_refunds),
        )
        .route(
            "/admin/refunds/{id}/approve",
            post(adapters::handlers::approve_refund),
        )
        .route(
            "/admin/refunds/{id}/reject",
            post(adapters::handlers::reject_refund),
        )
        .route(
            "/admin/payments/simulate",
            post(adapters::handlers::simulate_payment),
        )
        .route(
            "/admin/gateway/webhook-config",
            get(adapters::handlers::gateway_webhook_config)
                .post(adapters::handlers::update_gateway_webhook_config),
        )
        .route(
            "/admin/gateway/events",
            get(adapters::handlers::gateway_recent_events),
        )
        // Evidence uploads are the only large bodies; keep a tight cap.
        .layer(DefaultBodyLimit::max(512 * 1024))
        // Status polls may wait out the 30s gateway timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(40)))
        .with_state(state)
}
