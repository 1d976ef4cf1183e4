//! In-memory store. Backs the hermetic test suite and the simulated
//! payment method in development; one mutex serializes every operation,
//! which gives the same check-then-mutate atomicity the Postgres store
//! gets from row locks.

use {
    super::store::{RefundOutcome, Settlement, Store},
    crate::domain::{
        audit::{AuditLogEntry, NewAuditEntry},
        document::{Document, RefundDecision},
        error::PayError,
        payment::{NewPayment, Payment, PaymentStatus},
        user::{BONUS_SESSIONS_PER_PAYMENT, Tier, UserAccount},
    },
    async_trait::async_trait,
    chrono::{DateTime, Duration, Utc},
    std::collections::HashMap,
    std::sync::Mutex,
    uuid::Uuid,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserAccount>,
    documents: HashMap<Uuid, Document>,
    payments: HashMap<Uuid, Payment>,
    audit: Vec<AuditLogEntry>,
}

impl Inner {
    fn weekly_success_count(&self, user_id: Uuid, now: DateTime<Utc>) -> i64 {
        let cutoff = now - Duration::days(7);
        self.payments
            .values()
            .filter(|p| {
                p.user_id == user_id
                    && p.status == PaymentStatus::Success
                    && p.paid_at.is_some_and(|t| t >= cutoff)
            })
            .count() as i64
    }

    fn recompute_tier(&mut self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), PayError> {
        let count = self.weekly_success_count(user_id, now);
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PayError::NotFound(format!("user {user_id}")))?;
        user.weekly_payment_count = count;
        user.tier = Tier::for_weekly_payments(count);
        user.tier_recalculated_at = Some(now);
        Ok(())
    }

    fn successful_payment_for_document(&self, document_id: Uuid) -> Option<Payment> {
        self.payments
            .values()
            .filter(|p| p.document_id == document_id && p.status == PaymentStatus::Success)
            .max_by_key(|p| p.created_at)
            .cloned()
    }
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }
}

#[async_trait]
impl Store for MemStore {
    async fn insert_user(&self, user: &UserAccount) -> Result<(), PayError> {
        self.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: Uuid) -> Result<Option<UserAccount>, PayError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), PayError> {
        self.lock().documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn document(&self, id: Uuid) -> Result<Option<Document>, PayError> {
        Ok(self.lock().documents.get(&id).cloned())
    }

    async fn create_payment(&self, new: &NewPayment) -> Result<Payment, PayError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&new.user_id) {
            return Err(PayError::NotFound(format!("user {}", new.user_id)));
        }
        if !inner.documents.contains_key(&new.document_id) {
            return Err(PayError::NotFound(format!("document {}", new.document_id)));
        }
        let has_pending = inner
            .payments
            .values()
            .any(|p| p.document_id == new.document_id && p.status == PaymentStatus::Pending);
        if has_pending {
            return Err(PayError::DuplicatePendingPayment);
        }

        let now = Utc::now();
        let payment = Payment {
            id: new.id,
            user_id: new.user_id,
            document_id: new.document_id,
            amount: new.amount,
            method: new.method,
            status: PaymentStatus::Pending,
            gateway_order_id: new.gateway_order_id.clone(),
            public_code: new.public_code.clone(),
            transaction_ref: None,
            paid_at: None,
            refunded_at: None,
            admin_note: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
        };
        inner.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, PayError> {
        Ok(self.lock().payments.get(&id).cloned())
    }

    async fn payment_by_public_code(
        &self,
        public_code: &str,
    ) -> Result<Option<Payment>, PayError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.public_code.as_deref() == Some(public_code))
            .cloned())
    }

    async fn payment_by_transaction_ref(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, PayError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.transaction_ref.as_deref() == Some(transaction_ref))
            .cloned())
    }

    async fn pending_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.document_id == document_id && p.status == PaymentStatus::Pending)
            .cloned())
    }

    async fn latest_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        Ok(self
            .lock()
            .payments
            .values()
            .filter(|p| p.document_id == document_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn successful_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        Ok(self.lock().successful_payment_for_document(document_id))
    }

    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, PayError> {
        let mut payments: Vec<Payment> = self
            .lock()
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    async fn settle_success(
        &self,
        payment_id: Uuid,
        transaction_ref: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, PayError> {
        let mut inner = self.lock();
        let now = Utc::now();

        let current = inner
            .payments
            .get(&payment_id)
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id}")))?
            .clone();
        if current.status.is_settled() {
            return Ok(Settlement::AlreadySettled(current));
        }
        // Validate collaborators before touching anything; the mutex makes
        // the rest of this block atomic.
        if !inner.documents.contains_key(&current.document_id) {
            return Err(PayError::NotFound(format!(
                "document {}",
                current.document_id
            )));
        }
        if !inner.users.contains_key(&current.user_id) {
            return Err(PayError::NotFound(format!("user {}", current.user_id)));
        }

        let payment = inner.payments.get_mut(&payment_id).expect("checked above");
        payment.status = PaymentStatus::Success;
        payment.paid_at = Some(paid_at);
        if let Some(txn) = transaction_ref {
            payment.transaction_ref = Some(txn.to_string());
        }
        payment.updated_at = now;
        let payment = payment.clone();

        let document = inner
            .documents
            .get_mut(&payment.document_id)
            .expect("checked above");
        document.unlocked = true;
        document.unlocked_at = Some(paid_at);

        {
            let user = inner.users.get_mut(&payment.user_id).expect("checked above");
            user.bonus_sessions_today += BONUS_SESSIONS_PER_PAYMENT;
        }
        inner.recompute_tier(payment.user_id, now)?;

        Ok(Settlement::Applied(payment))
    }

    async fn settle_failure(&self, payment_id: Uuid, note: &str) -> Result<Settlement, PayError> {
        let mut inner = self.lock();
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id}")))?;
        if payment.status.is_settled() {
            return Ok(Settlement::AlreadySettled(payment.clone()));
        }
        payment.status = PaymentStatus::Failed;
        payment.admin_note = Some(note.to_string());
        payment.updated_at = Utc::now();
        Ok(Settlement::Applied(payment.clone()))
    }

    async fn open_refund_request(
        &self,
        document_id: Uuid,
        motive: &str,
        evidence_ref: Option<&str>,
    ) -> Result<Document, PayError> {
        let mut inner = self.lock();
        let document = inner
            .documents
            .get(&document_id)
            .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;

        if !document.unlocked {
            return Err(PayError::RefundNotEligible(
                "document is not unlocked".into(),
            ));
        }
        if document.refund_requested {
            return Err(PayError::RefundNotEligible(
                "a refund request is already pending".into(),
            ));
        }
        if inner.successful_payment_for_document(document_id).is_none() {
            return Err(PayError::RefundNotEligible(
                "no successful payment found for this document".into(),
            ));
        }

        let document = inner.documents.get_mut(&document_id).expect("checked above");
        document.refund_requested = true;
        document.refund_requested_at = Some(Utc::now());
        document.rejection_reason = Some(motive.to_string());
        document.evidence_ref = evidence_ref.map(str::to_string);
        document.admin_comment = None;
        Ok(document.clone())
    }

    async fn apply_refund_decision(
        &self,
        document_id: Uuid,
        decision: RefundDecision,
        admin_comment: &str,
    ) -> Result<RefundOutcome, PayError> {
        let mut inner = self.lock();
        let now = Utc::now();

        let document = inner
            .documents
            .get(&document_id)
            .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
        if !document.refund_requested {
            return Err(PayError::RefundNotEligible(
                "no refund request is pending".into(),
            ));
        }
        let payment = inner
            .successful_payment_for_document(document_id)
            .ok_or_else(|| {
                PayError::RefundNotEligible(
                    "no successful payment found for this document".into(),
                )
            })?;

        let record = document.history_record(decision, admin_comment, now);
        let motive = document.rejection_reason.clone();

        let payment = match decision {
            RefundDecision::Approved => {
                let payment = inner.payments.get_mut(&payment.id).expect("looked up above");
                payment.status = PaymentStatus::Refunded;
                payment.refunded_at = Some(now);
                payment.refund_reason = motive;
                payment.updated_at = now;
                payment.clone()
            }
            RefundDecision::Rejected => payment,
        };

        let document = inner.documents.get_mut(&document_id).expect("checked above");
        if decision == RefundDecision::Approved {
            document.unlocked = false;
        }
        document.refund_requested = false;
        document.admin_comment = Some(admin_comment.to_string());
        document.refund_history.push(record);
        let document = document.clone();

        if decision == RefundDecision::Approved {
            inner.recompute_tier(payment.user_id, now)?;
        }

        Ok(RefundOutcome {
            document,
            payment,
            decision,
        })
    }

    async fn documents_with_pending_refund(&self) -> Result<Vec<Document>, PayError> {
        let mut documents: Vec<Document> = self
            .lock()
            .documents
            .values()
            .filter(|d| d.refund_requested)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.refund_requested_at);
        Ok(documents)
    }

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<(), PayError> {
        self.lock().audit.push(AuditLogEntry {
            id: entry.id,
            actor_id: entry.actor_id,
            actor_email: entry.actor_email.clone(),
            action: entry.action,
            entity: entry.entity.clone(),
            entity_id: entry.entity_id,
            detail: entry.detail.clone(),
            source_ip: entry.source_ip.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn audit_entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditLogEntry>, PayError> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|e| e.entity_id == Some(entity_id))
            .cloned()
            .collect())
    }

    async fn recalculate_all_tiers(&self) -> Result<u64, PayError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let user_ids: Vec<Uuid> = inner.users.keys().copied().collect();
        for user_id in &user_ids {
            inner.recompute_tier(*user_id, now)?;
        }
        Ok(user_ids.len() as u64)
    }

    async fn reset_bonus_sessions(&self) -> Result<u64, PayError> {
        let mut inner = self.lock();
        let mut reset = 0;
        for user in inner.users.values_mut() {
            if user.bonus_sessions_today > 0 {
                user.bonus_sessions_today = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }
}
