//! Bounded pool for best-effort background jobs.
//!
//! Distillation and fact extraction run here so the response path never
//! waits on the completion service.  Jobs are one-shot futures returning
//! `Result<(), RecallError>`; errors are logged and swallowed.
//!
//! | limit        | behaviour when reached                               |
//! |--------------|------------------------------------------------------|
//! | `workers`    | further jobs wait for a permit                       |
//! | `queue_bound`| new submissions are dropped with a warning           |
//!
//! [`BackgroundPool::shutdown`] stops intake, waits for in-flight jobs up to
//! a deadline and aborts whatever is left.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use recall_types::RecallError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Jobs running at the same time.
    pub workers: usize,
    /// Jobs accepted but not yet finished, running ones included.
    pub queue_bound: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 4, queue_bound: 64 }
    }
}

/// Outcome of [`BackgroundPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    pub aborted: usize,
}

pub struct BackgroundPool {
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
    config: PoolConfig,
}

/// Decrements the pending counter when a job ends, aborted or not.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackgroundPool {
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            pending: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Jobs accepted and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue `job`.  Returns `false` when the pool is shut down or full.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, label: &'static str, job: F) -> bool
    where
        F: Future<Output = Result<(), RecallError>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            warn!(task = label, "background pool is shut down, job dropped");
            return false;
        }
        let reserved = self.pending.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < self.config.queue_bound).then_some(n + 1)
        });
        if reserved.is_err() {
            warn!(task = label, queue_bound = self.config.queue_bound, "background queue full, job dropped");
            return false;
        }

        let guard = PendingGuard(Arc::clone(&self.pending));
        let permits = Arc::clone(&self.permits);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished jobs so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match job.await {
                Ok(()) => debug!(task = label, "background job finished"),
                Err(e) => warn!(task = label, error = %e, "background job failed"),
            }
        });
        true
    }

    /// Wait for every job submitted so far.
    pub async fn drain(&self) -> usize {
        let mut set = self.take_tasks();
        let mut completed = 0;
        while set.join_next().await.is_some() {
            completed += 1;
        }
        completed
    }

    /// Stop intake, wait up to `timeout` for in-flight jobs, abort the rest.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.closed.store(true, Ordering::SeqCst);
        let mut set = self.take_tasks();
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(_)) => report.completed += 1,
                Ok(None) => break,
                Err(_) => {
                    report.aborted = set.len();
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    break;
                }
            }
        }
        info!(completed = report.completed, aborted = report.aborted, "background pool shut down");
        report
    }

    fn take_tasks(&self) -> JoinSet<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *tasks)
    }
}

impl Default for BackgroundPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrency_is_bounded_by_workers() {
        let pool = BackgroundPool::new(PoolConfig { workers: 2, queue_bound: 16 });
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            assert!(pool.submit("probe", async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(pool.drain().await, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn overflow_is_dropped() {
        let pool = BackgroundPool::new(PoolConfig { workers: 1, queue_bound: 2 });
        let gate = Arc::new(Semaphore::new(0));
        for _ in 0..2 {
            let gate = Arc::clone(&gate);
            assert!(pool.submit("blocked", async move {
                let _ = gate.acquire().await;
                Ok(())
            }));
        }
        assert!(!pool.submit("overflow", async { Ok(()) }));

        gate.add_permits(2);
        assert_eq!(pool.drain().await, 2);
        assert_eq!(pool.pending(), 0);
        assert!(pool.submit("after", async { Ok(()) }));
    }

    #[tokio::test]
    async fn failing_jobs_are_swallowed() {
        let pool = BackgroundPool::default();
        pool.submit("fails", async { Err(RecallError::UpstreamAnalysis("boom".into())) });
        pool.submit("succeeds", async { Ok(()) });
        assert_eq!(pool.drain().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_stuck_jobs_and_refuses_new_work() {
        let pool = BackgroundPool::default();
        pool.submit("quick", async { Ok(()) });
        pool.submit("stuck", std::future::pending());
        tokio::task::yield_now().await;

        let report = pool.shutdown(Duration::from_millis(50)).await;
        assert_eq!(report, ShutdownReport { completed: 1, aborted: 1 });
        assert_eq!(pool.pending(), 0);
        assert!(!pool.submit("late", async { Ok(()) }));
    }
}
