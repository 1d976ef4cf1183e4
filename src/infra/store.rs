use {
    crate::domain::{
        audit::{AuditLogEntry, NewAuditEntry},
        document::{Document, RefundDecision},
        error::PayError,
        payment::{NewPayment, Payment},
        user::UserAccount,
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

/// Result of a settlement attempt. Whichever caller lands first performs
/// the real transition; the loser observes `AlreadySettled` and exits.
#[derive(Debug, Clone)]
pub enum Settlement {
    Applied(Payment),
    AlreadySettled(Payment),
}

impl Settlement {
    pub fn payment(&self) -> &Payment {
        match self {
            Self::Applied(p) | Self::AlreadySettled(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub document: Document,
    pub payment: Payment,
    pub decision: RefundDecision,
}

/// Persistence seam. Every mutating operation is a single atomic
/// check-then-mutate unit: status is re-read inside the same transaction
/// (or lock) as the write, so concurrent callers cannot both observe
/// `Pending` and both transition.
#[async_trait]
pub trait Store: Send + Sync {
    // ── users & documents (owned elsewhere, consulted/mutated here) ──

    async fn insert_user(&self, user: &UserAccount) -> Result<(), PayError>;
    async fn user(&self, id: Uuid) -> Result<Option<UserAccount>, PayError>;
    async fn insert_document(&self, document: &Document) -> Result<(), PayError>;
    async fn document(&self, id: Uuid) -> Result<Option<Document>, PayError>;

    // ── payments ──

    /// Insert a new `Pending` payment. Fails with
    /// `DuplicatePendingPayment` while another pending payment exists for
    /// the same document; the uniqueness is a storage constraint, not a
    /// request-ordering assumption.
    async fn create_payment(&self, new: &NewPayment) -> Result<Payment, PayError>;
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, PayError>;
    async fn payment_by_public_code(&self, public_code: &str)
    -> Result<Option<Payment>, PayError>;
    async fn payment_by_transaction_ref(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, PayError>;
    async fn pending_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError>;
    async fn latest_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError>;
    async fn successful_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError>;
    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, PayError>;

    // ── settlement: state machine + benefit unlocking, one transaction ──

    /// `Pending → Success`, plus the success consequences: document
    /// unlocked, owner's weekly count and tier recomputed, bonus session
    /// credits granted. All or nothing.
    async fn settle_success(
        &self,
        payment_id: Uuid,
        transaction_ref: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, PayError>;

    /// `Pending → Failed`, with the reason kept as an admin note.
    async fn settle_failure(&self, payment_id: Uuid, note: &str) -> Result<Settlement, PayError>;

    // ── refunds ──

    async fn open_refund_request(
        &self,
        document_id: Uuid,
        motive: &str,
        evidence_ref: Option<&str>,
    ) -> Result<Document, PayError>;

    async fn apply_refund_decision(
        &self,
        document_id: Uuid,
        decision: RefundDecision,
        admin_comment: &str,
    ) -> Result<RefundOutcome, PayError>;

    async fn documents_with_pending_refund(&self) -> Result<Vec<Document>, PayError>;

    // ── audit ──

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<(), PayError>;
    async fn audit_entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditLogEntry>, PayError>;

    // ── periodic jobs ──

    /// Recompute every user's weekly count and tier from the payments
    /// table. Idempotent; converges with the request-time recomputation.
    async fn recalculate_all_tiers(&self) -> Result<u64, PayError>;

    /// Midnight reset of the per-day bonus session credits.
    async fn reset_bonus_sessions(&self) -> Result<u64, PayError>;
}
