//! Burst coalescing for blocking jobs
//!
//! A [`Debouncer`] waits for triggers on a channel. Each trigger arms (or
//! re-arms) a timer. When the timer expires with triggers pending, the job
//! runs exactly once on the blocking pool and the debouncer goes back to
//! idle. Triggers arriving while the job runs start the next burst.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace};

/// A blocking unit of work run once per burst
pub type BlockingJob = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Capacity of a trigger channel
///
/// A full channel already guarantees a pending run, so extra triggers
/// can be dropped.
const TRIGGER_CAPACITY: usize = 64;

/// Sending half used to trigger a [`Debouncer`]
#[derive(Debug)]
pub struct Trigger<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Trigger<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Trigger<T> {
    /// Request a run without blocking; returns false once the debouncer is gone
    pub fn fire(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Timer state of a debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Armed { pending: usize },
}

/// Runs a blocking job once per burst of triggers
pub struct Debouncer<T> {
    name: String,
    interval: Duration,
    rx: mpsc::Receiver<T>,
    job: BlockingJob,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(name: impl Into<String>, interval: Duration, job: BlockingJob) -> (Trigger<T>, Self) {
        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        (
            Trigger { tx },
            Self {
                name: name.into(),
                interval,
                rx,
                job,
            },
        )
    }

    /// Spawn the debounce loop on the current runtime
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    /// Run until stopped or every trigger is dropped
    ///
    /// Pending triggers, including any still queued in the channel, are
    /// flushed with one final run before returning.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut state = State::Idle;
        let timer = tokio::time::sleep(self.interval);
        tokio::pin!(timer);

        loop {
            let armed = matches!(state, State::Armed { .. });

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                msg = self.rx.recv() => match msg {
                    Some(_) => {
                        state = match state {
                            State::Idle => State::Armed { pending: 1 },
                            State::Armed { pending } => State::Armed { pending: pending + 1 },
                        };
                        timer.as_mut().reset(Instant::now() + self.interval);
                    }
                    None => break,
                },
                _ = &mut timer, if armed => {
                    if let State::Armed { pending } = state {
                        trace!(debouncer = %self.name, pending, "Debounce window expired");
                    }
                    self.run_job().await;
                    state = State::Idle;
                }
            }
        }

        let mut pending = match state {
            State::Armed { pending } => pending,
            State::Idle => 0,
        };
        while self.rx.try_recv().is_ok() {
            pending += 1;
        }
        if pending > 0 {
            debug!(debouncer = %self.name, pending, "Flushing pending triggers on shutdown");
            self.run_job().await;
        }
        debug!(debouncer = %self.name, "Debouncer stopped");
    }

    async fn run_job(&self) {
        let job = Arc::clone(&self.job);
        match tokio::task::spawn_blocking(move || job()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(debouncer = %self.name, error = %e, "Debounced job failed"),
            Err(e) => error!(debouncer = %self.name, error = %e, "Debounced job panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job() -> (Arc<AtomicUsize>, BlockingJob) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let job: BlockingJob = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, job)
    }

    #[tokio::test]
    async fn test_burst_runs_once() {
        let (count, job) = counting_job();
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_millis(100), job);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = debouncer.spawn(stop_rx);

        for _ in 0..10 {
            trigger.fire(());
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(trigger);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_separate_bursts_run_separately() {
        let (count, job) = counting_job();
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_millis(50), job);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = debouncer.spawn(stop_rx);

        trigger.fire(());
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.fire(());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(trigger);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_trigger_no_run() {
        let (count, job) = counting_job();
        let (_trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_millis(20), job);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = debouncer.spawn(stop_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_flushes_pending() {
        let (count, job) = counting_job();
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_secs(60), job);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = debouncer.spawn(stop_rx);

        trigger.fire(());
        trigger.fire(());
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_flushes_queued_triggers() {
        let (count, job) = counting_job();
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_secs(60), job);
        let (stop_tx, stop_rx) = watch::channel(false);

        // Queued and stopped before the loop is ever polled
        trigger.fire(());
        stop_tx.send(true).unwrap();
        debouncer.run(stop_rx).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_failure_does_not_stop_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let job: BlockingJob = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("disk unavailable")
        });
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_millis(30), job);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle = debouncer.spawn(stop_rx);

        trigger.fire(());
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.fire(());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(trigger);
        handle.await.unwrap();
    }

    #[test]
    fn test_fire_after_drop_reports_closed() {
        let (_, job) = counting_job();
        let (trigger, debouncer) = Debouncer::<()>::new("test", Duration::from_millis(10), job);
        drop(debouncer);
        assert!(!trigger.fire(()));
    }
}
