//! Event reducer
//!
//! Browsers rewrite their bookmark files in bursts of many small writes. The
//! reducer collapses each burst into a single reload once events stop
//! arriving for one interval.

use std::time::Duration;

use crate::debounce::{BlockingJob, Debouncer, Trigger};

/// Build a reducer for source `id` that runs `load` once per burst
pub fn reducer(id: &str, interval: Duration, load: BlockingJob) -> (Trigger<()>, Debouncer<()>) {
    Debouncer::new(format!("reducer:{}", id), interval, load)
}
