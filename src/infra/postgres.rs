//! Postgres store. Runtime-checked queries over `sqlx`; every mutating
//! operation re-reads current state under `FOR UPDATE` inside the same
//! transaction as its writes, and the one-pending-per-document rule is a
//! partial unique index rather than an application-level check.

use {
    super::store::{RefundOutcome, Settlement, Store},
    crate::domain::{
        audit::{AuditAction, AuditLogEntry, NewAuditEntry},
        document::{Document, DocumentKind, RefundDecision},
        error::PayError,
        payment::{NewPayment, Payment, PaymentMethod, PaymentStatus},
        user::{BONUS_SESSIONS_PER_PAYMENT, Tier, UserAccount},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow},
    uuid::Uuid,
};

const PAYMENT_COLUMNS: &str = "id, user_id, document_id, amount, method, status, \
     gateway_order_id, public_code, transaction_ref, paid_at, refunded_at, \
     admin_note, refund_reason, created_at, updated_at";

const DOCUMENT_COLUMNS: &str = "id, user_id, kind, unlocked, unlocked_at, \
     refund_requested, refund_requested_at, rejection_reason, evidence_ref, \
     admin_comment, refund_history";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn payment_from_row(row: &PgRow) -> Result<Payment, PayError> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        document_id: row.try_get("document_id")?,
        amount: row.try_get("amount")?,
        method: PaymentMethod::try_from(method.as_str())?,
        status: PaymentStatus::try_from(status.as_str())?,
        gateway_order_id: row.try_get("gateway_order_id")?,
        public_code: row.try_get("public_code")?,
        transaction_ref: row.try_get("transaction_ref")?,
        paid_at: row.try_get("paid_at")?,
        refunded_at: row.try_get("refunded_at")?,
        admin_note: row.try_get("admin_note")?,
        refund_reason: row.try_get("refund_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn document_from_row(row: &PgRow) -> Result<Document, PayError> {
    let kind: String = row.try_get("kind")?;
    let history: serde_json::Value = row.try_get("refund_history")?;
    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: DocumentKind::try_from(kind.as_str())?,
        unlocked: row.try_get("unlocked")?,
        unlocked_at: row.try_get("unlocked_at")?,
        refund_requested: row.try_get("refund_requested")?,
        refund_requested_at: row.try_get("refund_requested_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        evidence_ref: row.try_get("evidence_ref")?,
        admin_comment: row.try_get("admin_comment")?,
        refund_history: serde_json::from_value(history)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserAccount, PayError> {
    let level: i16 = row.try_get("tier")?;
    Ok(UserAccount {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        is_admin: row.try_get("is_admin")?,
        tier: Tier::from_level(level as u8)?,
        weekly_payment_count: row.try_get("weekly_payment_count")?,
        tier_recalculated_at: row.try_get("tier_recalculated_at")?,
        bonus_sessions_today: row.try_get("bonus_sessions_today")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditLogEntry, PayError> {
    let action: String = row.try_get("action")?;
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        actor_email: row.try_get("actor_email")?,
        action: AuditAction::try_from(action.as_str())?,
        entity: row.try_get("entity")?,
        entity_id: row.try_get("entity_id")?,
        detail: row.try_get("detail")?,
        source_ip: row.try_get("source_ip")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn fetch_payment_for_update(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> Result<Option<Payment>, PayError> {
    let row = sqlx::query(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
    ))
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(payment_from_row).transpose()
}

async fn fetch_document_for_update(
    tx: &mut Transaction<'_, Postgres>,
    document_id: Uuid,
) -> Result<Option<Document>, PayError> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 FOR UPDATE"
    ))
    .bind(document_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// Recompute the rolling 7-day count and tier for one user, inside the
/// caller's transaction.
async fn recompute_tier(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    extra_bonus: i64,
) -> Result<(), PayError> {
    let weekly: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments \
         WHERE user_id = $1 AND status = 'success' \
           AND paid_at >= now() - interval '7 days'",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    let tier = Tier::for_weekly_payments(weekly);
    let updated = sqlx::query(
        "UPDATE users \
         SET tier = $1, weekly_payment_count = $2, tier_recalculated_at = now(), \
             bonus_sessions_today = bonus_sessions_today + $3 \
         WHERE id = $4",
    )
    .bind(tier.level() as i16)
    .bind(weekly)
    .bind(extra_bonus)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(PayError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &UserAccount) -> Result<(), PayError> {
        sqlx::query(
            "INSERT INTO users \
                 (id, email, is_admin, tier, weekly_payment_count, \
                  tier_recalculated_at, bonus_sessions_today) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(user.is_admin)
        .bind(user.tier.level() as i16)
        .bind(user.weekly_payment_count)
        .bind(user.tier_recalculated_at)
        .bind(user.bonus_sessions_today)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user(&self, id: Uuid) -> Result<Option<UserAccount>, PayError> {
        let row = sqlx::query(
            "SELECT id, email, is_admin, tier, weekly_payment_count, \
                    tier_recalculated_at, bonus_sessions_today \
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_document(&self, document: &Document) -> Result<(), PayError> {
        sqlx::query(
            "INSERT INTO documents \
                 (id, user_id, kind, unlocked, unlocked_at, refund_requested, \
                  refund_requested_at, rejection_reason, evidence_ref, \
                  admin_comment, refund_history) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(document.id)
        .bind(document.user_id)
        .bind(document.kind.as_str())
        .bind(document.unlocked)
        .bind(document.unlocked_at)
        .bind(document.refund_requested)
        .bind(document.refund_requested_at)
        .bind(&document.rejection_reason)
        .bind(&document.evidence_ref)
        .bind(&document.admin_comment)
        .bind(serde_json::to_value(&document.refund_history)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn document(&self, id: Uuid) -> Result<Option<Document>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn create_payment(&self, new: &NewPayment) -> Result<Payment, PayError> {
        let result = sqlx::query(&format!(
            "INSERT INTO payments \
                 (id, user_id, document_id, amount, method, status, \
                  gateway_order_id, public_code) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7) \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(new.id)
        .bind(new.user_id)
        .bind(new.document_id)
        .bind(new.amount)
        .bind(new.method.as_str())
        .bind(&new.gateway_order_id)
        .bind(&new.public_code)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => payment_from_row(&row),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some("payments_one_pending_per_document") =>
            {
                Err(PayError::DuplicatePendingPayment)
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => Err(
                PayError::NotFound(format!("user {} or document {}", new.user_id, new.document_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payment_by_public_code(
        &self,
        public_code: &str,
    ) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE public_code = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(public_code)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payment_by_transaction_ref(
        &self,
        transaction_ref: &str,
    ) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE transaction_ref = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(transaction_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn pending_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE document_id = $1 AND status = 'pending'"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn latest_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE document_id = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn successful_payment_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<Payment>, PayError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE document_id = $1 AND status = 'success' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn payments_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>, PayError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn settle_success(
        &self,
        payment_id: Uuid,
        transaction_ref: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, PayError> {
        let mut tx = self.pool.begin().await?;

        let payment = fetch_payment_for_update(&mut tx, payment_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id}")))?;
        if payment.status.is_settled() {
            tx.commit().await?;
            return Ok(Settlement::AlreadySettled(payment));
        }

        sqlx::query(
            "UPDATE payments \
             SET status = 'success', paid_at = $1, \
                 transaction_ref = COALESCE($2, transaction_ref), updated_at = now() \
             WHERE id = $3",
        )
        .bind(paid_at)
        .bind(transaction_ref)
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

        let unlocked = sqlx::query(
            "UPDATE documents SET unlocked = TRUE, unlocked_at = $1 WHERE id = $2",
        )
        .bind(paid_at)
        .bind(payment.document_id)
        .execute(&mut *tx)
        .await?;
        if unlocked.rows_affected() == 0 {
            return Err(PayError::NotFound(format!(
                "document {}",
                payment.document_id
            )));
        }

        recompute_tier(&mut tx, payment.user_id, BONUS_SESSIONS_PER_PAYMENT).await?;

        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
        let payment = payment_from_row(&row)?;

        tx.commit().await?;
        Ok(Settlement::Applied(payment))
    }

    async fn settle_failure(&self, payment_id: Uuid, note: &str) -> Result<Settlement, PayError> {
        let mut tx = self.pool.begin().await?;

        let payment = fetch_payment_for_update(&mut tx, payment_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("payment {payment_id}")))?;
        if payment.status.is_settled() {
            tx.commit().await?;
            return Ok(Settlement::AlreadySettled(payment));
        }

        let row = sqlx::query(&format!(
            "UPDATE payments \
             SET status = 'failed', admin_note = $1, updated_at = now() \
             WHERE id = $2 \
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(note)
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
        let payment = payment_from_row(&row)?;

        tx.commit().await?;
        Ok(Settlement::Applied(payment))
    }

    async fn open_refund_request(
        &self,
        document_id: Uuid,
        motive: &str,
        evidence_ref: Option<&str>,
    ) -> Result<Document, PayError> {
        let mut tx = self.pool.begin().await?;

        let document = fetch_document_for_update(&mut tx, document_id)
            .await?
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

        let has_success: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE document_id = $1 AND status = 'success'",
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        if has_success == 0 {
            return Err(PayError::RefundNotEligible(
                "no successful payment found for this document".into(),
            ));
        }

        let row = sqlx::query(&format!(
            "UPDATE documents \
             SET refund_requested = TRUE, refund_requested_at = now(), \
                 rejection_reason = $1, evidence_ref = $2, admin_comment = NULL \
             WHERE id = $3 \
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(motive)
        .bind(evidence_ref)
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        let document = document_from_row(&row)?;

        tx.commit().await?;
        Ok(document)
    }

    async fn apply_refund_decision(
        &self,
        document_id: Uuid,
        decision: RefundDecision,
        admin_comment: &str,
    ) -> Result<RefundOutcome, PayError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let document = fetch_document_for_update(&mut tx, document_id)
            .await?
            .ok_or_else(|| PayError::NotFound(format!("document {document_id}")))?;
        if !document.refund_requested {
            return Err(PayError::RefundNotEligible(
                "no refund request is pending".into(),
            ));
        }

        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE document_id = $1 AND status = 'success' \
             ORDER BY created_at DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?;
        let payment = row
            .as_ref()
            .map(payment_from_row)
            .transpose()?
            .ok_or_else(|| {
                PayError::RefundNotEligible("no successful payment found for this document".into())
            })?;

        let record = document.history_record(decision, admin_comment, now);
        let record_json = serde_json::to_value(&record)?;

        let payment = match decision {
            RefundDecision::Approved => {
                let row = sqlx::query(&format!(
                    "UPDATE payments \
                     SET status = 'refunded', refunded_at = $1, \
                         refund_reason = $2, updated_at = now() \
                     WHERE id = $3 \
                     RETURNING {PAYMENT_COLUMNS}"
                ))
                .bind(now)
                .bind(&document.rejection_reason)
                .bind(payment.id)
                .fetch_one(&mut *tx)
                .await?;
                payment_from_row(&row)?
            }
            RefundDecision::Rejected => payment,
        };

        let row = sqlx::query(&format!(
            "UPDATE documents \
             SET unlocked = CASE WHEN $1 THEN FALSE ELSE unlocked END, \
                 refund_requested = FALSE, admin_comment = $2, \
                 refund_history = refund_history || jsonb_build_array($3::jsonb) \
             WHERE id = $4 \
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(decision == RefundDecision::Approved)
        .bind(admin_comment)
        .bind(record_json)
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        let document = document_from_row(&row)?;

        if decision == RefundDecision::Approved {
            recompute_tier(&mut tx, payment.user_id, 0).await?;
        }

        tx.commit().await?;
        Ok(RefundOutcome {
            document,
            payment,
            decision,
        })
    }

    async fn documents_with_pending_refund(&self) -> Result<Vec<Document>, PayError> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE refund_requested ORDER BY refund_requested_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn append_audit(&self, entry: &NewAuditEntry) -> Result<(), PayError> {
        sqlx::query(
            "INSERT INTO audit_log \
                 (id, actor_id, actor_email, action, entity, entity_id, detail, source_ip) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.actor_email)
        .bind(entry.action.as_str())
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.detail)
        .bind(&entry.source_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditLogEntry>, PayError> {
        let rows = sqlx::query(
            "SELECT id, actor_id, actor_email, action, entity, entity_id, \
                    detail, source_ip, created_at \
             FROM audit_log WHERE entity_id = $1 ORDER BY created_at",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn recalculate_all_tiers(&self) -> Result<u64, PayError> {
        let result = sqlx::query(
            "WITH weekly AS ( \
                 SELECT u.id AS user_id, COUNT(p.id) AS paid \
                 FROM users u \
                 LEFT JOIN payments p \
                   ON p.user_id = u.id AND p.status = 'success' \
                  AND p.paid_at >= now() - interval '7 days' \
                 GROUP BY u.id \
             ) \
             UPDATE users \
             SET weekly_payment_count = weekly.paid, \
                 tier = CASE \
                     WHEN weekly.paid = 0 THEN 0 \
                     WHEN weekly.paid = 1 THEN 1 \
                     WHEN weekly.paid = 2 THEN 2 \
                     ELSE 3 END, \
                 tier_recalculated_at = now() \
             FROM weekly WHERE users.id = weekly.user_id",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_bonus_sessions(&self) -> Result<u64, PayError> {
        let result =
            sqlx::query("UPDATE users SET bonus_sessions_today = 0 WHERE bonus_sessions_today > 0")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
