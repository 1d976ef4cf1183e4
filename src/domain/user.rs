use {
    super::error::PayError,
    chrono::{DateTime, Utc},
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Extra same-day session credits granted on every successful payment.
pub const BONUS_SESSIONS_PER_PAYMENT: i64 = 2;

/// Weekly tier derived from successful payments in the trailing 7 days.
#[derive(Debug, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[display("FREE")]
    Free,
    #[display("BRONZE")]
    Bronze,
    #[display("SILVER")]
    Silver,
    #[display("GOLD")]
    Gold,
}

/// Per-tier session quota. Bonus credits add on top of `sessions_per_day`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SessionLimits {
    pub sessions_per_day: i64,
    pub minutes_per_session: i64,
    /// None means unlimited.
    pub total_minutes: Option<i64>,
}

impl Tier {
    /// Pure tier mapping: 0 → Free, 1 → Bronze, 2 → Silver, 3+ → Gold.
    pub fn for_weekly_payments(count: i64) -> Tier {
        match count {
            i64::MIN..=0 => Self::Free,
            1 => Self::Bronze,
            2 => Self::Silver,
            _ => Self::Gold,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Bronze => 1,
            Self::Silver => 2,
            Self::Gold => 3,
        }
    }

    pub fn from_level(level: u8) -> Result<Tier, PayError> {
        match level {
            0 => Ok(Self::Free),
            1 => Ok(Self::Bronze),
            2 => Ok(Self::Silver),
            3 => Ok(Self::Gold),
            other => Err(PayError::Validation(format!("unknown tier level: {other}"))),
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        match self {
            Self::Free => SessionLimits {
                sessions_per_day: 3,
                minutes_per_session: 10,
                total_minutes: Some(30),
            },
            Self::Bronze => SessionLimits {
                sessions_per_day: 5,
                minutes_per_session: 10,
                total_minutes: Some(50),
            },
            Self::Silver => SessionLimits {
                sessions_per_day: 7,
                minutes_per_session: 10,
                total_minutes: Some(70),
            },
            Self::Gold => SessionLimits {
                sessions_per_day: 10,
                minutes_per_session: 15,
                total_minutes: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
    pub tier: Tier,
    pub weekly_payment_count: i64,
    pub tier_recalculated_at: Option<DateTime<Utc>>,
    pub bonus_sessions_today: i64,
}

impl UserAccount {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            is_admin: false,
            tier: Tier::Free,
            weekly_payment_count: 0,
            tier_recalculated_at: None,
            bonus_sessions_today: 0,
        }
    }
}
