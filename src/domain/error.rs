use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("a pending payment already exists for this document")]
    DuplicatePendingPayment,

    #[error("refund not eligible: {0}")]
    RefundNotEligible(String),

    #[error("payment gateway unreachable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("missing or malformed authentication headers")]
    MissingAuthHeaders,

    #[error("malformed event body: {0}")]
    MalformedEventBody(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
