use crate::{domain::audit::NewAuditEntry, infra::store::Store};

/// Append an audit entry, best-effort. A logging failure must never abort
/// the admin action it is recording, so errors are logged and swallowed.
pub async fn record(store: &dyn Store, entry: NewAuditEntry) {
    match store.append_audit(&entry).await {
        Ok(()) => tracing::info!(
            action = %entry.action,
            actor = %entry.actor_email,
            entity = %entry.entity,
            entity_id = ?entry.entity_id,
            "audit entry recorded"
        ),
        Err(e) => tracing::error!(
            error = %e,
            action = %entry.action,
            actor = %entry.actor_email,
            entity = %entry.entity,
            entity_id = ?entry.entity_id,
            detail = %entry.detail,
            "audit log write failed"
        ),
    }
}
