//! Periodic re-fetch of sources declaring a poll interval

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::debounce::BlockingJob;

/// Run `job` every `interval` until `stop` flips
///
/// The first run happens one full interval after start. A tick is never
/// started while the previous run is still going.
pub async fn run_poll_loop(
    id: String,
    interval: Duration,
    job: BlockingJob,
    mut stop: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let job = job.clone();
                match tokio::task::spawn_blocking(move || job()).await {
                    Ok(Ok(())) => debug!(module = %id, "Poll completed"),
                    Ok(Err(e)) => error!(module = %id, error = %e, "Poll failed"),
                    Err(e) => error!(module = %id, error = %e, "Poll task panicked"),
                }
            }
        }
    }
    debug!(module = %id, "Poll loop stopped");
}
