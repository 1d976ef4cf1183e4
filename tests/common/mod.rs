#![allow(dead_code)]

use {
    async_trait::async_trait,
    axum::{
        Router,
        body::Body,
        http::{Request, Response, StatusCode, header},
    },
    chrono::Utc,
    http_body_util::BodyExt,
    lexpay::{
        AdminConfig, AppState,
        adapters::gateway::{CreatedOrder, FeedEvent, Gateway, GatewayConfig, WebhookConfig},
        adapters::signing,
        domain::{
            document::{Document, DocumentKind},
            error::PayError,
            payment::Payment,
            user::UserAccount,
        },
        infra::{memory::MemStore, store::Store},
    },
    serde_json::{Value, json},
    std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    tower::util::ServiceExt,
    uuid::Uuid,
};

pub const GATEWAY_SECRET: &str = "test-business-secret";
pub const GATEWAY_LOGIN: &str = "test-login";
pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const ADMIN_EMAIL: &str = "admin@example.com";

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        base_url: "https://gateway.test".into(),
        login: GATEWAY_LOGIN.into(),
        trans_key: "test-trans-key".into(),
        secret: GATEWAY_SECRET.into(),
        frontend_url: "https://app.test".into(),
    }
}

/// Scriptable gateway stub: orders succeed with predictable codes, the
/// event feed is whatever the test pushed, and either call can be made
/// to fail like an unreachable gateway.
pub struct StubGateway {
    orders: AtomicU32,
    events: Mutex<Vec<FeedEvent>>,
    orders_down: Mutex<bool>,
    events_down: Mutex<bool>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            orders: AtomicU32::new(0),
            events: Mutex::new(Vec::new()),
            orders_down: Mutex::new(false),
            events_down: Mutex::new(false),
        }
    }

    pub fn push_event(&self, event_type: &str, payload: Value) {
        self.events.lock().unwrap().push(FeedEvent {
            event_type: event_type.to_string(),
            created_at: Some(Utc::now()),
            payload,
        });
    }

    pub fn set_orders_down(&self, down: bool) {
        *self.orders_down.lock().unwrap() = down;
    }

    pub fn set_events_down(&self, down: bool) {
        *self.events_down.lock().unwrap() = down;
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn create_order(
        &self,
        _amount: i64,
        document_id: Uuid,
        kind: DocumentKind,
    ) -> Result<CreatedOrder, PayError> {
        if *self.orders_down.lock().unwrap() {
            return Err(PayError::GatewayUnavailable("connection refused".into()));
        }
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = (document_id, kind);
        Ok(CreatedOrder {
            checkout_url: format!("https://gateway.test/checkout/pc-{n}"),
            public_code: format!("pc-{n}"),
            order_id: n.to_string(),
            expires_at: Some("2024-03-12T03:27:34Z".into()),
            status: "pending".into(),
        })
    }

    async fn recent_events(&self) -> Result<Vec<FeedEvent>, PayError> {
        if *self.events_down.lock().unwrap() {
            return Err(PayError::GatewayUnavailable("connection refused".into()));
        }
        Ok(self.events.lock().unwrap().clone())
    }

    async fn webhook_config(&self) -> Result<WebhookConfig, PayError> {
        Ok(WebhookConfig {
            webhook_url: Some("https://app.test/webhooks/gateway".into()),
            configured_categories: vec!["payment".into()],
            available_categories: vec!["payment".into(), "deposit".into()],
        })
    }

    async fn update_webhook_config(
        &self,
        webhook_url: &str,
        categories: &[String],
    ) -> Result<WebhookConfig, PayError> {
        Ok(WebhookConfig {
            webhook_url: Some(webhook_url.to_string()),
            configured_categories: categories.to_vec(),
            available_categories: vec!["payment".into(), "deposit".into()],
        })
    }
}

pub struct TestApp {
    pub store: Arc<MemStore>,
    pub gateway: Arc<StubGateway>,
    pub router: Router,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemStore::new());
    let gateway = Arc::new(StubGateway::new());
    let state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        gateway_config: Arc::new(gateway_config()),
        admin: Arc::new(AdminConfig {
            token: ADMIN_TOKEN.into(),
            actor_id: Uuid::now_v7(),
            actor_email: ADMIN_EMAIL.into(),
        }),
    };
    TestApp {
        store,
        gateway,
        router: lexpay::app(state),
    }
}

// ── fixtures ───────────────────────────────────────────────────────────

pub async fn seed_user(store: &dyn Store) -> UserAccount {
    let user = UserAccount::new(Uuid::now_v7(), "user@example.com");
    store.insert_user(&user).await.unwrap();
    user
}

pub async fn seed_document(store: &dyn Store, user_id: Uuid) -> Document {
    let document = Document::new(Uuid::now_v7(), user_id, DocumentKind::Tutela);
    store.insert_document(&document).await.unwrap();
    document
}

/// User with one settled gateway payment and an unlocked document.
pub async fn seed_paid_document(store: &dyn Store) -> (UserAccount, Document, Payment) {
    let user = seed_user(store).await;
    let document = seed_document(store, user.id).await;
    let payment = seed_settled_payment(store, user.id, document.id, "pc-paid").await;
    let user = store.user(user.id).await.unwrap().unwrap();
    let document = store.document(document.id).await.unwrap().unwrap();
    (user, document, payment)
}

/// Pending gateway payment with a known public code.
pub async fn seed_pending_payment(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
    public_code: &str,
) -> Payment {
    use lexpay::domain::payment::{NewPayment, PaymentMethod};
    let new = NewPayment::new(
        user_id,
        document_id,
        39000,
        PaymentMethod::Gateway,
        Some("order-1".into()),
        Some(public_code.into()),
    );
    store.create_payment(&new).await.unwrap()
}

pub async fn seed_settled_payment(
    store: &dyn Store,
    user_id: Uuid,
    document_id: Uuid,
    public_code: &str,
) -> Payment {
    let pending = seed_pending_payment(store, user_id, document_id, public_code).await;
    let settlement = store
        .settle_success(pending.id, Some("txn-1"), Utc::now())
        .await
        .unwrap();
    settlement.payment().clone()
}

// ── request helpers ────────────────────────────────────────────────────

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    read_response(response).await
}

pub async fn read_response(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn json_request(
    method: &str,
    uri: &str,
    user_id: Option<Uuid>,
    admin: bool,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header("X-User-Id", user_id.to_string());
    }
    if admin {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Signed webhook delivery, exactly as the gateway would send it.
pub fn webhook_request(body: &Value) -> Request<Body> {
    let x_date = signing::x_date_now();
    let signature = signing::sign_webhook(GATEWAY_SECRET, GATEWAY_LOGIN, &x_date, body);
    Request::builder()
        .method("POST")
        .uri("/webhooks/gateway")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Date", x_date)
        .header(
            header::AUTHORIZATION,
            format!("V2-HMAC-SHA256, Signature: {signature}"),
        )
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn paid_webhook_body(public_code: &str) -> Value {
    json!({
        "event_type": "payment_order.paid",
        "event_id": format!("evt-{public_code}"),
        "created_at": "2024-03-12T03:27:34.000Z",
        "data": {
            "public_code": public_code,
            "id": 4711,
            "amount": "39000.0",
            "status": "paid",
        }
    })
}

/// Multipart body for the refund endpoint.
pub fn refund_request(
    document_id: Uuid,
    user_id: Uuid,
    reason: &str,
    with_evidence: bool,
) -> Request<Body> {
    let boundary = "lexpay-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"reason\"\r\n\r\n{reason}\r\n"
    );
    if with_evidence {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"evidence\"; \
             filename=\"court-rejection.pdf\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    Request::builder()
        .method("POST")
        .uri(format!("/documents/{document_id}/refund"))
        .header("X-User-Id", user_id.to_string())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}
