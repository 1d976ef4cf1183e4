use {
    crate::domain::{
        error::PayError,
        user::{SessionLimits, Tier, UserAccount},
    },
    crate::infra::store::Store,
    serde::Serialize,
};

/// Session quota view for a user: base limits from the tier plus today's
/// bonus credits.
#[derive(Debug, Serialize)]
pub struct QuotaView {
    pub tier: Tier,
    pub tier_level: u8,
    pub limits: SessionLimits,
    pub bonus_sessions_today: i64,
    pub sessions_available_today: i64,
}

pub fn quota_for(user: &UserAccount) -> QuotaView {
    let limits = user.tier.session_limits();
    QuotaView {
        tier: user.tier,
        tier_level: user.tier.level(),
        bonus_sessions_today: user.bonus_sessions_today,
        sessions_available_today: limits.sessions_per_day + user.bonus_sessions_today,
        limits,
    }
}

/// Batch recomputation of every user's weekly count and tier. Idempotent;
/// running it twice yields the same tiers as running it once, and it
/// converges with the request-time recomputation done at settlement.
pub async fn recalculate_all(store: &dyn Store) -> Result<u64, PayError> {
    let updated = store.recalculate_all_tiers().await?;
    tracing::info!(users = updated, "tier recalculation batch finished");
    Ok(updated)
}

/// Midnight reset of per-day bonus session credits.
pub async fn reset_daily_bonuses(store: &dyn Store) -> Result<u64, PayError> {
    let reset = store.reset_bonus_sessions().await?;
    if reset > 0 {
        tracing::info!(users = reset, "daily bonus sessions reset");
    }
    Ok(reset)
}
