//! Periodic expiry of stale credential-store entries.

use std::time::Duration;

use chrono::Utc;
use spacebridge_core::CredentialStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Sweep `store` every `every` until `shutdown` is cancelled, dropping
/// sessions older than `session_max_age` and pending authorizations older
/// than `pending_max_age`. The first sweep runs one interval after start.
pub async fn run(
    store: CredentialStore,
    every: Duration,
    session_max_age: chrono::Duration,
    pending_max_age: chrono::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let report = store.sweep(Utc::now(), session_max_age, pending_max_age);
                let stats = store.stats();
                tracing::info!(
                    event = "store_sweep",
                    sessions_removed = report.sessions_removed,
                    pending_removed = report.pending_removed,
                    sessions = stats.sessions,
                    pending_authorizations = stats.pending_authorizations,
                    "Swept expired credentials"
                );
            }
        }
    }
    tracing::debug!(event = "store_sweep_stopped", "Sweeper stopped");
}
