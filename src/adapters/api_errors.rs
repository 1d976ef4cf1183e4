use {
    crate::domain::error::PayError,
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
};

/// Newtype over the domain error so the HTTP mapping lives in the
/// adapter layer.
pub struct ApiError(pub PayError);

impl From<PayError> for ApiError {
    fn from(err: PayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            PayError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            PayError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            PayError::DuplicatePendingPayment => (
                StatusCode::BAD_REQUEST,
                "duplicate_pending_payment",
                self.0.to_string(),
            ),
            PayError::RefundNotEligible(msg) => {
                (StatusCode::BAD_REQUEST, "refund_not_eligible", msg.clone())
            }
            PayError::GatewayUnavailable(err) => {
                tracing::error!(error = %err, "payment gateway unreachable");
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_unavailable",
                    "payment gateway unreachable".to_string(),
                )
            }
            PayError::Gateway(err) => {
                tracing::error!(error = %err, "payment gateway error");
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error",
                    "payment gateway error".to_string(),
                )
            }
            PayError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "invalid webhook signature".to_string(),
            ),
            PayError::MissingAuthHeaders => (
                StatusCode::UNAUTHORIZED,
                "missing_auth_headers",
                "missing or malformed authentication headers".to_string(),
            ),
            PayError::MalformedEventBody(msg) => {
                (StatusCode::BAD_REQUEST, "malformed_body", msg.clone())
            }
            PayError::Unauthorized => (
                StatusCode::FORBIDDEN,
                "unauthorized",
                "admin privileges required".to_string(),
            ),
            PayError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            PayError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
