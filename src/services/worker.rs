//! Periodic maintenance loops. Both jobs are idempotent, so overlapping
//! with the request-time recomputation is harmless.

use {
    super::tier,
    crate::infra::store::Store,
    chrono::{Days, Utc},
    std::sync::Arc,
    std::time::Duration,
    tokio::sync::watch,
};

const TIER_RECALC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Hourly batch tier recalculation.
pub async fn run_tier_recalc(store: Arc<dyn Store>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("tier recalculation worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("tier recalculation worker shutting down");
                return;
            }
            _ = tokio::time::sleep(TIER_RECALC_INTERVAL) => {}
        }

        if let Err(e) = tier::recalculate_all(store.as_ref()).await {
            tracing::error!(error = %e, "tier recalculation batch failed");
        }
    }
}

/// Reset per-day bonus session credits at every UTC midnight.
pub async fn run_bonus_reset(store: Arc<dyn Store>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("bonus reset worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("bonus reset worker shutting down");
                return;
            }
            _ = tokio::time::sleep(until_next_midnight()) => {}
        }

        if let Err(e) = tier::reset_daily_bonuses(store.as_ref()).await {
            tracing::error!(error = %e, "bonus reset batch failed");
        }
    }
}

fn until_next_midnight() -> Duration {
    let now = Utc::now();
    let next = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("tomorrow midnight exists")
        .and_utc();
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}
