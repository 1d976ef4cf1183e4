//! The gateway's two HMAC-SHA256 canonicalizations.
//!
//! Outbound requests sign `login + x_date + body_digest`, where the digest
//! is the body's keys sorted alphabetically, each key immediately followed
//! by its value, no separators. Inbound webhooks sign
//! `login + x_date + compact_json(body)`, compact JSON in the key order
//! the event was received with. The gateway specifies both independently;
//! they are intentionally not the same scheme.

use {
    chrono::Utc,
    hmac::{Hmac, Mac},
    serde_json::Value,
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

/// `X-Date` header value: ISO-8601 UTC with milliseconds and a `Z` suffix.
pub fn x_date_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Digest for outbound request signing.
///
/// `{"amount":400,"currency":"USD"}` → `"amount400currencyUSD"`.
pub fn request_body_digest(body: &Value) -> String {
    let Some(object) = body.as_object() else {
        return String::new();
    };
    let mut entries: Vec<(&String, &Value)> = object.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut digest = String::new();
    for (key, value) in entries {
        digest.push_str(key);
        digest.push_str(&scalar_repr(value));
    }
    digest
}

fn scalar_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        nested => nested.to_string(),
    }
}

/// Compact serialization preserving the received key order. Relies on
/// serde_json's `preserve_order` feature; re-ordering keys here would
/// invalidate every inbound signature.
pub fn compact_json(body: &Value) -> String {
    body.to_string()
}

fn hmac_hex(secret: &str, message: &str) -> String {
    hex::encode(hmac_bytes(secret, message))
}

fn hmac_bytes(secret: &str, message: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Signature for an outbound gateway request.
pub fn sign_request(secret: &str, login: &str, x_date: &str, body: &Value) -> String {
    let message = format!("{login}{x_date}{}", request_body_digest(body));
    hmac_hex(secret, &message)
}

/// Signature the gateway attaches to a webhook delivery.
pub fn sign_webhook(secret: &str, login: &str, x_date: &str, body: &Value) -> String {
    let message = format!("{login}{x_date}{}", compact_json(body));
    hmac_hex(secret, &message)
}

/// Constant-time verification of an inbound webhook signature.
pub fn verify_webhook_signature(
    secret: &str,
    login: &str,
    x_date: &str,
    body: &Value,
    signature_hex: &str,
) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    let message = format!("{login}{x_date}{}", compact_json(body));
    let expected = hmac_bytes(secret, &message);
    expected.ct_eq(provided.as_slice()).into()
}

/// Extract the hex signature from an
/// `Authorization: V2-HMAC-SHA256, Signature: <64-hex>` header.
pub fn extract_signature(authorization: &str) -> Option<&str> {
    if !authorization.trim_start().starts_with("V2-HMAC-SHA256") {
        return None;
    }
    let (_, tail) = authorization.split_once("Signature:")?;
    let signature = tail.trim();
    let is_hex = signature.len() == 64 && signature.chars().all(|c| c.is_ascii_hexdigit());
    is_hex.then_some(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-business-secret";
    const LOGIN: &str = "test-login";
    const X_DATE: &str = "2024-03-12T03:27:34.123Z";

    #[test]
    fn digest_matches_documented_example() {
        let body = json!({"amount": 400, "currency": "USD"});
        assert_eq!(request_body_digest(&body), "amount400currencyUSD");
    }

    #[test]
    fn digest_sorts_keys() {
        let body = json!({"currency": "USD", "amount": 400});
        assert_eq!(request_body_digest(&body), "amount400currencyUSD");
    }

    #[test]
    fn empty_body_digest_is_empty() {
        assert_eq!(request_body_digest(&json!({})), "");
        assert_eq!(request_body_digest(&Value::Null), "");
    }

    #[test]
    fn compact_json_has_no_whitespace_and_keeps_order() {
        let body: Value =
            serde_json::from_str("{\"b\": 1, \"a\": {\"x\": true} }").unwrap();
        assert_eq!(compact_json(&body), "{\"b\":1,\"a\":{\"x\":true}}");
    }

    #[test]
    fn canonicalizations_differ_for_the_same_body() {
        let body = json!({"currency": "USD", "amount": 400});
        assert_ne!(
            sign_request(SECRET, LOGIN, X_DATE, &body),
            sign_webhook(SECRET, LOGIN, X_DATE, &body),
        );
    }

    #[test]
    fn webhook_roundtrip_verifies() {
        let body = json!({"event_type": "payment_order.paid", "data": {"public_code": "pc"}});
        let signature = sign_webhook(SECRET, LOGIN, X_DATE, &body);
        assert!(verify_webhook_signature(SECRET, LOGIN, X_DATE, &body, &signature));
    }

    #[test]
    fn flipped_signature_bit_rejected() {
        let body = json!({"event_type": "payment_order.paid"});
        let signature = sign_webhook(SECRET, LOGIN, X_DATE, &body);

        let mut flipped = signature.clone().into_bytes();
        // Swap one hex digit; stays within the hex alphabet.
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).unwrap();
        assert_ne!(flipped, signature);
        assert!(!verify_webhook_signature(SECRET, LOGIN, X_DATE, &body, &flipped));

        assert!(!verify_webhook_signature("other-secret", LOGIN, X_DATE, &body, &signature));
        assert!(!verify_webhook_signature(SECRET, "other-login", X_DATE, &body, &signature));
        assert!(!verify_webhook_signature(SECRET, LOGIN, X_DATE, &body, "zz"));
    }

    #[test]
    fn extract_signature_accepts_documented_form() {
        let sig = "a".repeat(64);
        let header = format!("V2-HMAC-SHA256, Signature: {sig}");
        assert_eq!(extract_signature(&header), Some(sig.as_str()));
    }

    #[test]
    fn extract_signature_rejects_malformed_headers() {
        assert_eq!(extract_signature(""), None);
        assert_eq!(extract_signature("Bearer abc"), None);
        assert_eq!(extract_signature("V2-HMAC-SHA256"), None);
        // Too short.
        assert_eq!(extract_signature("V2-HMAC-SHA256, Signature: abcd"), None);
        // Not hex.
        let bad = format!("V2-HMAC-SHA256, Signature: {}", "g".repeat(64));
        assert_eq!(extract_signature(&bad), None);
    }

    #[test]
    fn x_date_has_millisecond_precision() {
        let stamp = x_date_now();
        assert!(stamp.ends_with('Z'));
        // 2024-03-12T03:27:34.123Z
        assert_eq!(stamp.len(), 24);
        assert_eq!(&stamp[23..], "Z");
        assert_eq!(&stamp[19..20], ".");
    }
}
