//! Shared scheduling resource for deferred and background work.
//!
//! One `Scheduler` is owned by the saga service and shared by every
//! coordinator. Delayed tasks are cancelled on shutdown while their delay is
//! still pending; tasks that already started run to completion and are
//! awaited by [`Scheduler::shutdown`].

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tracks spawned tasks and cancels pending delays on shutdown.
#[derive(Debug, Default)]
pub struct Scheduler {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler bound to the current tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` immediately on the runtime.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Runs `task` once `delay` has elapsed.
    ///
    /// Resolves to `None` if the scheduler shut down before the delay elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => None,
                () = tokio::time::sleep(delay) => Some(task.await),
            }
        })
    }

    /// Waits for `delay` unless the scheduler shuts down first.
    ///
    /// Returns `false` when interrupted by shutdown.
    pub async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// `true` once [`Scheduler::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of tasks still tracked.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Cancels pending delays without waiting for running tasks.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.tracker.close();
    }

    /// Cancels pending delays and waits for running tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scheduled_task_runs_after_delay() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let handle = scheduler.schedule(Duration::from_millis(100), async move {
            h.fetch_add(1, Ordering::SeqCst);
            7
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(handle.await.unwrap(), Some(7));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_delays() {
        let scheduler = Scheduler::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let handle = scheduler.schedule(Duration::from_secs(60), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.shutdown().await;
        assert!(scheduler.is_shutdown());
        assert_eq!(handle.await.unwrap(), None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_tasks() {
        let scheduler = Scheduler::new();
        let done = Arc::new(AtomicU32::new(0));
        let d = done.clone();
        scheduler.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            d.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_interrupted_by_shutdown() {
        let scheduler = Arc::new(Scheduler::new());
        let s = scheduler.clone();
        let sleeper = tokio::spawn(async move { s.sleep(Duration::from_secs(3600)).await });
        tokio::task::yield_now().await;
        scheduler.shutdown().await;
        assert!(!sleeper.await.unwrap());
    }
}
