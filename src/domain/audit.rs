use {
    super::error::PayError,
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::fmt,
    uuid::Uuid,
};

/// Privileged administrative actions worth an audit trail.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ApproveRefund,
    RejectRefund,
    ProcessRefund,
    AdminUnlock,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApproveRefund => "approve_refund",
            Self::RejectRefund => "reject_refund",
            Self::ProcessRefund => "process_refund",
            Self::AdminUnlock => "admin_unlock",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AuditAction {
    type Error = PayError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "approve_refund" => Ok(Self::ApproveRefund),
            "reject_refund" => Ok(Self::RejectRefund),
            "process_refund" => Ok(Self::ProcessRefund),
            "admin_unlock" => Ok(Self::AdminUnlock),
            other => Err(PayError::Validation(format!(
                "unknown audit action: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_email: String,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub source_ip: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        actor_id: Uuid,
        actor_email: impl Into<String>,
        action: AuditAction,
        entity: impl Into<String>,
        entity_id: Option<Uuid>,
        detail: serde_json::Value,
        source_ip: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id,
            actor_email: actor_email.into(),
            action,
            entity: entity.into(),
            entity_id,
            detail,
            source_ip,
        }
    }
}

/// Immutable, read-back form.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_email: String,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub source_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}
