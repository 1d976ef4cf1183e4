use {
    super::error::PayError,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Lifecycle rank — higher means further along. Used to prevent
    /// out-of-order events from regressing status.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Success | Self::Failed => 1,
            Self::Refunded => 2,
        }
    }

    pub fn can_transition_to(&self, new: &PaymentStatus) -> bool {
        matches!(
            (self, new),
            (Self::Pending, Self::Success)
                | (Self::Pending, Self::Failed)
                | (Self::Success, Self::Refunded)
        )
    }

    /// A settled payment never re-enters the pending flow.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = PayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(PayError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Simulated,
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Gateway => "gateway",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentMethod {
    type Error = PayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "simulated" => Ok(Self::Simulated),
            "gateway" => Ok(Self::Gateway),
            other => Err(PayError::Validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

/// One attempt to pay for unlocking one document.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Uuid,
    /// Whole Colombian pesos, no minor units.
    pub amount: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub public_code: Option<String>,
    pub transaction_ref: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub admin_note: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn transition_status(&mut self, new: PaymentStatus) -> Result<(), PayError> {
        if !self.status.can_transition_to(&new) {
            return Err(PayError::Validation(format!(
                "invalid status transition: {} → {}",
                self.status, new
            )));
        }
        self.status = new;
        Ok(())
    }
}

/// For INSERT — id generated in Rust via Uuid::now_v7().
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Uuid,
    pub amount: i64,
    pub method: PaymentMethod,
    pub gateway_order_id: Option<String>,
    pub public_code: Option<String>,
}

impl NewPayment {
    pub fn new(
        user_id: Uuid,
        document_id: Uuid,
        amount: i64,
        method: PaymentMethod,
        gateway_order_id: Option<String>,
        public_code: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            document_id,
            amount,
            method,
            gateway_order_id,
            public_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(&Success));
        assert!(Pending.can_transition_to(&Failed));
        assert!(Success.can_transition_to(&Refunded));

        assert!(!Success.can_transition_to(&Pending));
        assert!(!Failed.can_transition_to(&Success));
        assert!(!Failed.can_transition_to(&Refunded));
        assert!(!Refunded.can_transition_to(&Pending));
        assert!(!Refunded.can_transition_to(&Success));
        assert!(!Pending.can_transition_to(&Refunded));
    }

    #[test]
    fn rank_is_monotone_along_valid_transitions() {
        use PaymentStatus::*;
        for from in [Pending, Success, Failed, Refunded] {
            for to in [Pending, Success, Failed, Refunded] {
                if from.can_transition_to(&to) {
                    assert!(from.rank() < to.rank(), "{from} → {to}");
                }
            }
        }
    }

    #[test]
    fn transition_status_rejects_regression() {
        let mut payment = Payment {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            document_id: Uuid::now_v7(),
            amount: 39000,
            method: PaymentMethod::Gateway,
            status: PaymentStatus::Refunded,
            gateway_order_id: None,
            public_code: None,
            transaction_ref: None,
            paid_at: None,
            refunded_at: None,
            admin_note: None,
            refund_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(payment.transition_status(PaymentStatus::Pending).is_err());
        assert!(payment.transition_status(PaymentStatus::Success).is_err());
    }
}
