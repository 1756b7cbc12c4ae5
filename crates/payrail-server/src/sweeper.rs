use std::sync::Arc;
use std::time::Duration;

use payrail::Orchestrator;
use tokio::task::JoinHandle;

/// Periodically expire pending orders whose deadline has passed.
pub fn start_expiry_sweeper(orchestrator: Arc<Orchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let orchestrator = Arc::clone(&orchestrator);
            match tokio::task::spawn_blocking(move || orchestrator.expire_stale()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(expired)) => tracing::debug!(expired, "expiry sweep finished"),
                Ok(Err(e)) => tracing::warn!(error = %e, "expiry sweep failed"),
                Err(e) => tracing::error!(error = %e, "expiry sweep panicked"),
            }
        }
    })
}
