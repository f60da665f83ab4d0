//! Background job: drop expired cache entries and stale revocations.
//!
//! Expired entries are never served, but without a sweep they stay resident
//! until the same key is read again. Revoked tokens are only kept until their
//! own expiry; after that signature verification rejects them anyway.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::AppState;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Spawn the sweeper. Call this once at startup.
pub fn spawn(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&state);
        }
    })
}

/// One sweep pass. Returns `(cache entries evicted, revocations purged)`.
pub fn sweep(state: &AppState) -> (usize, usize) {
    let evicted = state.cache.evict_expired();
    let purged = state.tokens.purge_expired();
    if evicted > 0 || purged > 0 {
        tracing::info!(evicted, purged, "sweeper removed stale entries");
    }
    (evicted, purged)
}
