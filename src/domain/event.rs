use {
    chrono::{DateTime, Utc},
    serde_json::Value,
    uuid::Uuid,
};

/// Event types the gateway documents as a completed payment.
const PAID_EVENT_TYPES: &[&str] = &[
    "transaction.completed",
    "payment_order.paid",
    "payment_order_attempt.paid",
];

/// Status / event-type markers for a closed (unpaid) order.
const CLOSED_MARKERS: &[&str] = &[
    "denied",
    "failed",
    "time_out",
    "cancelled",
    "rejected",
    "expired",
];

/// Where an event points back to a local payment. The gateway hides the
/// correlation key in different nested locations depending on event type,
/// so the search happens once here and never in business logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRef {
    pub public_code: Option<String>,
    pub transaction_ref: Option<String>,
    pub document_id: Option<Uuid>,
}

impl EventRef {
    fn extract(data: &Value) -> EventRef {
        let public_code = data
            .get("public_code")
            .and_then(Value::as_str)
            .or_else(|| data.get("order").and_then(Value::as_str))
            .or_else(|| {
                data.get("payment_order")
                    .and_then(|po| po.get("public_code"))
                    .and_then(Value::as_str)
            })
            .or_else(|| {
                data.get("attributes")
                    .and_then(|a| a.get("public_code"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string);

        // Transaction ids arrive as strings or bare numbers.
        let transaction_ref = match data.get("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let document_id = data
            .get("description")
            .and_then(Value::as_str)
            .and_then(document_id_from_description);

        EventRef {
            public_code,
            transaction_ref,
            document_id,
        }
    }
}

/// Order descriptions carry the document id as `... document <uuid>`.
fn document_id_from_description(description: &str) -> Option<Uuid> {
    let (_, tail) = description.rsplit_once("document ")?;
    let token = tail.split_whitespace().next()?;
    Uuid::parse_str(token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-')).ok()
}

/// What a classified event means for the matched payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Closed(String),
    /// Informational only; no status change.
    None,
}

/// Closed set of gateway event kinds, fields declared per variant.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A payment order was paid at checkout.
    OrderPaid {
        reference: EventRef,
        amount: Option<f64>,
    },
    /// A settlement transaction completed against an order.
    TransactionCompleted {
        reference: EventRef,
        amount: Option<f64>,
    },
    /// The order will never be paid: denied, expired, cancelled or failed.
    OrderClosed {
        reference: EventRef,
        status: String,
    },
    Unclassified {
        event_type: String,
    },
}

impl GatewayEvent {
    /// Classify an event body. `data` is the event's payload object
    /// (`data` in webhook bodies, `payload` in the polling feed).
    pub fn classify(event_type: &str, data: &Value) -> GatewayEvent {
        let reference = EventRef::extract(data);
        let status = data.get("status").and_then(Value::as_str).unwrap_or("");
        let amount = extract_amount(data);

        let paid = PAID_EVENT_TYPES.contains(&event_type)
            || event_type.contains("completed")
            || event_type.contains("paid")
            || status == "completed"
            || status == "paid";

        if paid {
            if event_type.contains("transaction") || event_type.contains("completed") {
                return GatewayEvent::TransactionCompleted { reference, amount };
            }
            return GatewayEvent::OrderPaid { reference, amount };
        }

        let closed = CLOSED_MARKERS
            .iter()
            .any(|marker| event_type.contains(marker) || status == *marker);

        if closed {
            let status = if status.is_empty() {
                event_type.to_string()
            } else {
                status.to_string()
            };
            return GatewayEvent::OrderClosed { reference, status };
        }

        GatewayEvent::Unclassified {
            event_type: event_type.to_string(),
        }
    }

    pub fn reference(&self) -> Option<&EventRef> {
        match self {
            Self::OrderPaid { reference, .. }
            | Self::TransactionCompleted { reference, .. }
            | Self::OrderClosed { reference, .. } => Some(reference),
            Self::Unclassified { .. } => None,
        }
    }

    pub fn outcome(&self) -> PaymentOutcome {
        match self {
            Self::OrderPaid { .. } | Self::TransactionCompleted { .. } => PaymentOutcome::Paid,
            Self::OrderClosed { status, .. } => PaymentOutcome::Closed(status.clone()),
            Self::Unclassified { .. } => PaymentOutcome::None,
        }
    }
}

/// Amounts arrive as numbers or numeric strings ("39000.0").
fn extract_amount(data: &Value) -> Option<f64> {
    match data.get("amount") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// A verified webhook body: `{event_type, event_id, created_at, data}`.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub event_id: Option<String>,
    pub event_type: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub event: GatewayEvent,
}

impl WebhookEnvelope {
    pub fn parse(body: &Value) -> WebhookEnvelope {
        let event_type = body
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let event_id = body
            .get("event_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let occurred_at = body
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        WebhookEnvelope {
            event_id,
            occurred_at,
            event: GatewayEvent::classify(&event_type, &data),
            event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_paid_carries_public_code() {
        let event = GatewayEvent::classify(
            "payment_order.paid",
            &json!({"public_code": "pc-1", "amount": 39000}),
        );
        match event {
            GatewayEvent::OrderPaid { reference, amount } => {
                assert_eq!(reference.public_code.as_deref(), Some("pc-1"));
                assert_eq!(amount, Some(39000.0));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn transaction_completed_reads_order_field() {
        let event = GatewayEvent::classify(
            "transaction.completed",
            &json!({"order": "pc-2", "id": 881, "amount": "39000.0"}),
        );
        match &event {
            GatewayEvent::TransactionCompleted { reference, amount } => {
                assert_eq!(reference.public_code.as_deref(), Some("pc-2"));
                assert_eq!(reference.transaction_ref.as_deref(), Some("881"));
                assert_eq!(*amount, Some(39000.0));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(event.outcome(), PaymentOutcome::Paid);
    }

    #[test]
    fn nested_payment_order_location() {
        let event = GatewayEvent::classify(
            "payment_order_attempt.paid",
            &json!({"payment_order": {"public_code": "pc-3"}}),
        );
        assert_eq!(
            event.reference().unwrap().public_code.as_deref(),
            Some("pc-3")
        );
    }

    #[test]
    fn attributes_location() {
        let event = GatewayEvent::classify(
            "payment_order.paid",
            &json!({"attributes": {"public_code": "pc-4"}}),
        );
        assert_eq!(
            event.reference().unwrap().public_code.as_deref(),
            Some("pc-4")
        );
    }

    #[test]
    fn document_id_parsed_from_description() {
        let id = Uuid::now_v7();
        let event = GatewayEvent::classify(
            "payment_order.paid",
            &json!({"description": format!("Tutela fee - document {id}")}),
        );
        assert_eq!(event.reference().unwrap().document_id, Some(id));
    }

    #[test]
    fn denied_order_is_closed() {
        let event =
            GatewayEvent::classify("payment_order.denied", &json!({"public_code": "pc-5"}));
        assert_eq!(event.outcome(), PaymentOutcome::Closed("payment_order.denied".into()));
    }

    #[test]
    fn status_field_alone_closes() {
        let event = GatewayEvent::classify(
            "payment_order.updated",
            &json!({"public_code": "pc-6", "status": "expired"}),
        );
        assert_eq!(event.outcome(), PaymentOutcome::Closed("expired".into()));
    }

    #[test]
    fn unknown_event_is_unclassified() {
        let event = GatewayEvent::classify("business.updated", &json!({"field": 1}));
        assert!(matches!(event, GatewayEvent::Unclassified { .. }));
        assert_eq!(event.outcome(), PaymentOutcome::None);
        assert!(event.reference().is_none());
    }

    #[test]
    fn envelope_parses_header_fields() {
        let body = json!({
            "event_type": "payment_order.paid",
            "event_id": "evt-1",
            "created_at": "2024-03-12T03:27:34.000Z",
            "data": {"public_code": "pc-7"}
        });
        let envelope = WebhookEnvelope::parse(&body);
        assert_eq!(envelope.event_id.as_deref(), Some("evt-1"));
        assert_eq!(envelope.event_type, "payment_order.paid");
        assert!(envelope.occurred_at.is_some());
        assert!(matches!(envelope.event, GatewayEvent::OrderPaid { .. }));
    }
}
