use {
    crate::adapters::signing,
    crate::domain::{document::DocumentKind, error::PayError},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde_json::{Value, json},
    std::time::Duration,
    uuid::Uuid,
};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway credentials and endpoints, injected at construction so tests
/// can substitute fixtures. Never read from globals.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// `X-Login` business identifier; also the login used to verify
    /// inbound webhook signatures.
    pub login: String,
    /// `X-Trans-Key` header value.
    pub trans_key: String,
    /// HMAC secret, used as a UTF-8 string.
    pub secret: String,
    /// Base for post-checkout redirect URLs.
    pub frontend_url: String,
}

/// A freshly created payment order.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub checkout_url: String,
    pub public_code: String,
    pub order_id: String,
    pub expires_at: Option<String>,
    pub status: String,
}

/// One item of the business event feed used by reconciliation polling.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub event_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub webhook_url: Option<String>,
    pub configured_categories: Vec<String>,
    pub available_categories: Vec<String>,
}

/// Outbound gateway surface. The HTTP client implements it for the real
/// gateway; tests install a stub.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create_order(
        &self,
        amount: i64,
        document_id: Uuid,
        kind: DocumentKind,
    ) -> Result<CreatedOrder, PayError>;

    async fn recent_events(&self) -> Result<Vec<FeedEvent>, PayError>;

    async fn webhook_config(&self) -> Result<WebhookConfig, PayError>;

    async fn update_webhook_config(
        &self,
        webhook_url: &str,
        categories: &[String],
    ) -> Result<WebhookConfig, PayError>;
}

pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .expect("failed to build gateway http client");
        Self { http, config }
    }

    /// The order description carries the document id; webhook events that
    /// lose every other reference still correlate through it.
    pub fn order_description(kind: DocumentKind, document_id: Uuid) -> String {
        format!("{kind} fee - document {document_id}")
    }

    fn signed(&self, request: reqwest::RequestBuilder, body: &Value) -> reqwest::RequestBuilder {
        let x_date = signing::x_date_now();
        let signature =
            signing::sign_request(&self.config.secret, &self.config.login, &x_date, body);
        request
            .header("X-Login", &self.config.login)
            .header("X-Trans-Key", &self.config.trans_key)
            .header("X-Date", x_date)
            .header(
                "Authorization",
                format!("V2-HMAC-SHA256, Signature: {signature}"),
            )
    }

    fn redirect_urls(&self, document_id: Uuid) -> Value {
        let front = self.config.frontend_url.trim_end_matches('/');
        json!({
            "success_redirect_url": format!("{front}/app/documents/{document_id}?payment=success"),
            "pending_redirect_url": format!("{front}/app/documents/{document_id}?payment=pending"),
            "cancel_redirect_url": format!("{front}/app/documents?payment=cancelled&document_id={document_id}"),
            "error_redirect_url": format!("{front}/app/documents?payment=error&document_id={document_id}"),
        })
    }
}

/// Timeouts and connection failures are `GatewayUnavailable` (surfaced as
/// 502, caller decides about retrying); anything else is a gateway error.
fn transport_error(err: reqwest::Error) -> PayError {
    if err.is_timeout() || err.is_connect() {
        PayError::GatewayUnavailable(err.to_string())
    } else {
        PayError::Gateway(err.to_string())
    }
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_webhook_config(body: &Value) -> WebhookConfig {
    WebhookConfig {
        webhook_url: string_field(body, "webhook_url"),
        configured_categories: string_list(body, "configured_categories"),
        available_categories: string_list(body, "available_categories"),
    }
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn create_order(
        &self,
        amount: i64,
        document_id: Uuid,
        kind: DocumentKind,
    ) -> Result<CreatedOrder, PayError> {
        let urls = self.redirect_urls(document_id);
        let payload = json!({
            "amount": amount,
            // Country code must be upper case or the gateway rejects it.
            "country_iso_code": "CO",
            "issue": Self::order_description(kind, document_id),
            "success_redirect_url": urls["success_redirect_url"],
            "pending_redirect_url": urls["pending_redirect_url"],
            "cancel_redirect_url": urls["cancel_redirect_url"],
            "error_redirect_url": urls["error_redirect_url"],
        });

        let url = format!("{}/api/businesses/payment_orders", self.config.base_url);
        let response = self
            .signed(self.http.post(&url), &payload)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::error!(%status, %body, "payment order creation rejected");
            return Err(PayError::Gateway(format!(
                "order creation failed: HTTP {status}"
            )));
        }

        // Response shape: {"data": {"id", "type", "attributes": {...}}}.
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let attributes = data.get("attributes").cloned().unwrap_or(Value::Null);

        let order = CreatedOrder {
            checkout_url: string_field(&attributes, "url")
                .ok_or_else(|| PayError::Gateway("order response missing checkout url".into()))?,
            public_code: string_field(&attributes, "public_code")
                .ok_or_else(|| PayError::Gateway("order response missing public_code".into()))?,
            order_id: string_field(&data, "id")
                .ok_or_else(|| PayError::Gateway("order response missing order id".into()))?,
            expires_at: string_field(&attributes, "expires_at"),
            status: string_field(&attributes, "status").unwrap_or_else(|| "pending".into()),
        };

        tracing::info!(
            public_code = %order.public_code,
            order_id = %order.order_id,
            amount,
            "payment order created"
        );
        Ok(order)
    }

    async fn recent_events(&self) -> Result<Vec<FeedEvent>, PayError> {
        let url = format!("{}/api/businesses/events", self.config.base_url);
        let empty = json!({});
        let response = self
            .signed(self.http.get(&url), &empty)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(PayError::Gateway(format!(
                "event feed failed: HTTP {status}"
            )));
        }

        let events = body
            .get("events")
            .and_then(Value::as_array)
            .map(|events| {
                events
                    .iter()
                    .map(|event| FeedEvent {
                        event_type: string_field(event, "event_type").unwrap_or_default(),
                        created_at: event
                            .get("created_at")
                            .and_then(Value::as_str)
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|dt| dt.with_timezone(&Utc)),
                        payload: event.get("payload").cloned().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(events)
    }

    async fn webhook_config(&self) -> Result<WebhookConfig, PayError> {
        let url = format!("{}/api/businesses/webhooks", self.config.base_url);
        let empty = json!({});
        let response = self
            .signed(self.http.get(&url), &empty)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(PayError::Gateway(format!(
                "webhook config fetch failed: HTTP {status}"
            )));
        }
        Ok(parse_webhook_config(&body))
    }

    async fn update_webhook_config(
        &self,
        webhook_url: &str,
        categories: &[String],
    ) -> Result<WebhookConfig, PayError> {
        let payload = json!({
            "webhook_url": webhook_url,
            "categories": categories,
        });
        let url = format!("{}/api/businesses/webhooks", self.config.base_url);
        let response = self
            .signed(self.http.put(&url), &payload)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(PayError::Gateway(format!(
                "webhook config update failed: HTTP {status}"
            )));
        }
        tracing::info!(webhook_url, ?categories, "gateway webhook config updated");
        Ok(parse_webhook_config(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_description_embeds_document_id() {
        let id = Uuid::now_v7();
        let description = GatewayClient::order_description(DocumentKind::Tutela, id);
        assert_eq!(description, format!("Tutela fee - document {id}"));

        let description = GatewayClient::order_description(DocumentKind::PetitionRight, id);
        assert!(description.starts_with("Right of Petition fee"));
        assert!(description.ends_with(&id.to_string()));
    }
}
