//! Periodic reconciliation pass for the Change Router.
//!
//! Change streams can silently die (dropped connection, resumable error
//! exhausted); the sweeper re-runs [`ChangeRouter::reconcile`] for every
//! workspace at least once per `sweep_interval_secs` so a dead stream is
//! noticed and restarted rather than leaving a rule's job permanently
//! unwired.

use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;

use super::ChangeRouter;
use crate::logging::log_warn;

const MIN_SWEEP_INTERVAL_SECS: u64 = 60;

/// Runs [`ChangeRouter::reconcile`] for every workspace in `workspace_ids`
/// every `interval`, clamped to a floor of 60 seconds. Returns once a
/// shutdown signal is received.
pub async fn run(
    router: Arc<ChangeRouter>,
    workspace_ids: Vec<ObjectId>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let interval = interval.max(Duration::from_secs(MIN_SWEEP_INTERVAL_SECS));
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for workspace_id in &workspace_ids {
                    if let Err(e) = router.reconcile(*workspace_id).await {
                        log_warn!(workspace_id = %workspace_id, error = %e, "sweeper reconciliation failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_interval_is_clamped_to_the_floor() {
        let requested = Duration::from_secs(5);
        let clamped = requested.max(Duration::from_secs(MIN_SWEEP_INTERVAL_SECS));
        assert_eq!(clamped, Duration::from_secs(MIN_SWEEP_INTERVAL_SECS));
    }
}
