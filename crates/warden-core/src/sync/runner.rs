//! Bounded-width admission control for independent tasks.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::trace;

/// Runs at most `max_concurrent` tasks at once.
///
/// Tasks beyond the limit wait in FIFO order and are admitted as running
/// tasks complete, whether they succeed or fail.
pub struct ConcurrentRunner {
    max_concurrent: usize,
    semaphore: Semaphore,
    queued: AtomicUsize,
}

impl ConcurrentRunner {
    /// Creates a runner. A limit of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Semaphore::new(max_concurrent),
            queued: AtomicUsize::new(0),
        }
    }

    /// Runs `task` once a slot is free and returns its output.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        let waiting = Waiting::new(&self.queued);
        // The semaphore is never closed, so a permit is always eventually granted.
        let permit = self.semaphore.acquire().await.ok();
        drop(waiting);
        trace!(running = self.running(), "Runner admitted task");

        let output = task.await;
        drop(permit);
        output
    }

    /// Configured limit.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    /// Tasks waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// Counts a caller as queued until admitted or dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn new(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::SeqCst);
        Self(queued)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ConcurrentRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentRunner")
            .field("max_concurrent", &self.max_concurrent)
            .field("running", &self.running())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::{assert_pending, task};

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_concurrent() {
        let runner = Arc::new(ConcurrentRunner::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5u64)
            .map(|i| {
                let runner = Arc::clone(&runner);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    runner
                        .run(async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(10 * (i + 1))).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            i
                        })
                        .await
                })
            })
            .collect();

        sleep(Duration::from_millis(1)).await;
        assert_eq!(runner.running(), 2);
        assert_eq!(runner.queued(), 3);

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }
        outputs.sort();

        assert_eq!(outputs, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(runner.running(), 0);
        assert_eq!(runner.queued(), 0);
    }

    #[tokio::test]
    async fn test_failed_task_releases_slot() {
        let runner = ConcurrentRunner::new(1);
        let failed: Result<(), &str> = runner.run(async { Err("nope") }).await;
        assert!(failed.is_err());

        let ok = runner.run(async { 5 }).await;
        assert_eq!(ok, 5);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_leaves_queue() {
        let runner = ConcurrentRunner::new(1);
        let mut holder = task::spawn(runner.run(std::future::pending::<()>()));
        assert_pending!(holder.poll());
        assert_eq!(runner.running(), 1);

        let mut waiter = task::spawn(runner.run(async { 1 }));
        assert_pending!(waiter.poll());
        assert_eq!(runner.queued(), 1);

        drop(waiter);
        assert_eq!(runner.queued(), 0);

        drop(holder);
        assert_eq!(runner.running(), 0);
        assert_eq!(runner.run(async { 2 }).await, 2);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(ConcurrentRunner::new(0).max_concurrent(), 1);
    }
}
