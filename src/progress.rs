//! Run progress counters and the background logger that reports them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of run progress counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Batches fully processed in this run.
    pub batches: usize,
    /// Records whose mission fields were written from a backend result.
    pub annotated: usize,
    /// Records whose reply could not be parsed and were reset to null.
    pub degraded: usize,
    /// Backend requests that failed after all retries.
    pub failed_requests: usize,
    /// Checkpoints written in this run.
    pub checkpoints: usize,
    /// Wall-clock elapsed time since the monitor started.
    pub elapsed: Duration,
}

/// Shared atomic counters for run progress tracking.
///
/// Cloned into the engine and batch processors and incremented via
/// `fetch_add`. The background monitor reads these periodically.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub batches: Arc<AtomicUsize>,
    pub annotated: Arc<AtomicUsize>,
    pub degraded: Arc<AtomicUsize>,
    pub failed_requests: Arc<AtomicUsize>,
    pub checkpoints: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    /// Create a new set of zeroed progress counters.
    pub fn new() -> Self {
        Self {
            batches: Arc::new(AtomicUsize::new(0)),
            annotated: Arc::new(AtomicUsize::new(0)),
            degraded: Arc::new(AtomicUsize::new(0)),
            failed_requests: Arc::new(AtomicUsize::new(0)),
            checkpoints: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            annotated: self.annotated.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// Periodic logger for an active run.
///
/// The task ticks every `interval` and exits as soon as [`stop`](Self::stop)
/// is called or the monitor is dropped.
pub struct ProgressMonitor {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Spawn the logger. `total_batches` is the number of batches left when
    /// the run starts and only feeds the percentage.
    pub fn start(counters: ProgressCounters, total_batches: usize, interval: Duration) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let started = Instant::now();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => log_progress(&counters.snapshot(started), total_batches),
                }
            }
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stop the logger and wait for its task to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::debug!(error = %err, "Progress monitor task ended abnormally");
            }
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn log_progress(snap: &ProgressSnapshot, total_batches: usize) {
    let done = if total_batches == 0 {
        100.0
    } else {
        (snap.batches as f64 * 100.0 / total_batches as f64).min(100.0)
    };
    let secs = snap.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (snap.annotated + snap.degraded) as f64 / secs
    } else {
        0.0
    };

    tracing::info!(
        batches = snap.batches,
        total_batches = total_batches,
        annotated = snap.annotated,
        degraded = snap.degraded,
        failed_requests = snap.failed_requests,
        checkpoints = snap.checkpoints,
        done = format!("{done:.1}%"),
        elapsed = ?snap.elapsed,
        records_per_sec = format!("{rate:.2}"),
        "Tagging progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters_default() {
        let snap = ProgressCounters::new().snapshot(Instant::now());
        assert_eq!(snap.batches, 0);
        assert_eq!(snap.annotated, 0);
        assert_eq!(snap.degraded, 0);
        assert_eq!(snap.failed_requests, 0);
        assert_eq!(snap.checkpoints, 0);
    }

    #[test]
    fn test_progress_counters_clone_shares_state() {
        let counters = ProgressCounters::new();
        let clone = counters.clone();

        counters.annotated.fetch_add(4, Ordering::Relaxed);
        counters.failed_requests.fetch_add(1, Ordering::Relaxed);

        let snap = clone.snapshot(Instant::now());
        assert_eq!(snap.annotated, 4);
        assert_eq!(snap.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_monitor_stops_promptly() {
        let counters = ProgressCounters::new();
        counters.batches.fetch_add(3, Ordering::Relaxed);

        let monitor = ProgressMonitor::start(counters, 10, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("monitor should stop");
    }

    #[test]
    fn test_log_progress_with_no_batches() {
        let snap = ProgressCounters::new().snapshot(Instant::now());
        log_progress(&snap, 0);
    }
}
