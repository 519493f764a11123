//! Idle session reaper
//!
//! Periodically ends sessions whose operator has been absent for longer than the
//! configured idle timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::hub::Hub;

/// Spawn the reaper; it runs until the returned handle is aborted
pub fn spawn_reaper(hub: Arc<Hub>, sweep_every: Duration, idle_timeout: Duration) -> JoinHandle<()> {
    info!(
        "Starting idle reaper (sweep: {}s, idle timeout: {}s)",
        sweep_every.as_secs(),
        idle_timeout.as_secs()
    );

    tokio::spawn(async move {
        let mut timer = interval(sweep_every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        timer.tick().await;

        loop {
            timer.tick().await;
            let reaped = hub.reap_idle(idle_timeout).await;
            if reaped.is_empty() {
                debug!("Reaper: nothing idle");
            } else {
                info!("Reaper: ended {} idle session(s)", reaped.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::notifications::Notifier;
    use sdsync_common::time::ManualClock;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_ends_idle_session_on_sweep() {
        let clock = ManualClock::new(chrono::Utc::now());
        let hub = Arc::new(Hub::new(
            Arc::new(StaticCatalog::new()),
            Arc::new(clock.clone()),
            Notifier::default(),
        ));
        hub.create_session(Some("s1".to_string()), None).await.unwrap();

        let handle = spawn_reaper(Arc::clone(&hub), Duration::from_secs(30), Duration::from_secs(60));

        clock.advance(Duration::from_secs(45));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(hub.state("s1").await.is_ok());

        clock.advance(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(hub.state("s1").await.is_err());

        handle.abort();
    }
}
