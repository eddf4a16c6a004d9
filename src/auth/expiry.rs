use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::auth::repo::User;
use crate::state::AppState;

/// Background sweep that deletes accounts still unverified once their
/// window has lapsed. A periodic scan survives restarts, unlike a per
/// registration in-process timer; the `verified = false` predicate is
/// re-checked inside the delete itself, so an account verified between
/// ticks is never touched.
pub fn spawn_expiry_sweep(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.registration.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = expiry_cutoff(
                OffsetDateTime::now_utc(),
                state.config.registration.verification_window(),
            );
            match User::delete_expired_unverified(&state.db, cutoff).await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "removed expired unverified accounts"),
                Err(e) => warn!(error = %e, "account expiry sweep failed"),
            }
        }
    })
}

fn expiry_cutoff(now: OffsetDateTime, window: time::Duration) -> OffsetDateTime {
    now - window
}
