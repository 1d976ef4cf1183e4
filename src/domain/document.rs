use {
    super::error::PayError,
    chrono::{DateTime, Utc},
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Kinds of legal document the platform produces.
#[derive(Debug, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[display("Tutela")]
    Tutela,
    #[display("Right of Petition")]
    PetitionRight,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tutela => "tutela",
            Self::PetitionRight => "petition_right",
        }
    }
}

impl TryFrom<&str> for DocumentKind {
    type Error = PayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "tutela" => Ok(Self::Tutela),
            "petition_right" => Ok(Self::PetitionRight),
            other => Err(PayError::Validation(format!(
                "unknown document kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Display, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundDecision {
    #[display("approved")]
    Approved,
    #[display("rejected")]
    Rejected,
}

impl RefundDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// One entry of the append-only refund history on a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundRecord {
    pub decision: RefundDecision,
    pub requested_at: Option<DateTime<Utc>>,
    pub motive: Option<String>,
    pub evidence_ref: Option<String>,
    pub admin_comment: String,
    pub decided_at: DateTime<Utc>,
}

/// Payment-relevant view of a generated document. Content and generation
/// live elsewhere; this subsystem owns the unlock and refund sub-state.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: DocumentKind,
    pub unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub refund_requested: bool,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub evidence_ref: Option<String>,
    pub admin_comment: Option<String>,
    pub refund_history: Vec<RefundRecord>,
}

impl Document {
    pub fn new(id: Uuid, user_id: Uuid, kind: DocumentKind) -> Self {
        Self {
            id,
            user_id,
            kind,
            unlocked: false,
            unlocked_at: None,
            refund_requested: false,
            refund_requested_at: None,
            rejection_reason: None,
            evidence_ref: None,
            admin_comment: None,
            refund_history: Vec::new(),
        }
    }

    /// Snapshot the current request into a history record. Called at
    /// decision time, before the request fields are cleared.
    pub fn history_record(
        &self,
        decision: RefundDecision,
        admin_comment: &str,
        decided_at: DateTime<Utc>,
    ) -> RefundRecord {
        RefundRecord {
            decision,
            requested_at: self.refund_requested_at,
            motive: self.rejection_reason.clone(),
            evidence_ref: self.evidence_ref.clone(),
            admin_comment: admin_comment.to_string(),
            decided_at,
        }
    }
}
