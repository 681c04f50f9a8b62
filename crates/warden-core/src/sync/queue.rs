//! FIFO async task serializer with a liveness timeout.
//!
//! A [`Queue`] runs at most one task at a time. Each running task races its
//! timeout; a task that overruns is abandoned (it keeps running detached, and
//! its result is still delivered to its own caller) and the queue moves on.
//! The plugin manager keeps one queue per guild so that load and unload
//! requests for the same guild never overlap.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::error::{QueueError, QueueResult};

/// Default liveness timeout for a single queued task.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(60);

type Job = BoxFuture<'static, ()>;

struct QueueState {
    pending: VecDeque<Job>,
    running: bool,
}

struct QueueInner {
    timeout: Duration,
    state: Mutex<QueueState>,
}

/// A serial task queue.
///
/// Cloning a `Queue` yields another handle to the same queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Creates a queue with [`DEFAULT_QUEUE_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_QUEUE_TIMEOUT)
    }

    /// Creates a queue with a custom per-task timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                timeout,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: false,
                }),
            }),
        }
    }

    /// Enqueues `task` and returns a future for its own result.
    ///
    /// The task is enqueued immediately, before the returned future is polled.
    /// Must be called from within a Tokio runtime.
    pub fn add<F>(&self, task: F) -> impl Future<Output = QueueResult<F::Output>> + Send + 'static + use<F>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = async move {
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .map_err(|_| QueueError::Panicked);
            let _ = tx.send(result);
        }
        .boxed();

        let start = {
            let mut state = self.inner.state.lock();
            state.pending.push_back(job);
            !std::mem::replace(&mut state.running, true)
        };

        if start {
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        }

        async move { rx.await.unwrap_or(Err(QueueError::Dropped)) }
    }

    async fn drain(inner: Arc<QueueInner>) {
        loop {
            let job = {
                let mut state = inner.state.lock();
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };

            let handle = tokio::spawn(job);
            if tokio::time::timeout(inner.timeout, handle).await.is_err() {
                warn!(
                    timeout_ms = inner.timeout.as_millis() as u64,
                    "Queued task timed out, moving on to the next one"
                );
            }
        }
    }

    /// Drops every pending task. The task currently running is not aborted.
    ///
    /// Callers waiting on dropped tasks receive [`QueueError::Dropped`].
    pub fn destroy(&self) {
        let dropped = std::mem::take(&mut self.inner.state.lock().pending);
        trace!(dropped = dropped.len(), "Queue destroyed");
    }

    /// Number of tasks waiting to run (excluding the running one).
    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether no tasks are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a task is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Queue")
            .field("timeout", &self.inner.timeout)
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_one_at_a_time_in_order() {
        let queue = Queue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut results = Vec::new();
        for i in 0..5 {
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            let order = Arc::clone(&order);
            results.push(queue.add(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                order.lock().push(i);
                active.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }));
        }

        let values: Vec<_> = futures::future::join_all(results).await;
        assert_eq!(
            values.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![0, 2, 4, 6, 8]
        );
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_task_does_not_block_the_next() {
        let queue = Queue::with_timeout(Duration::from_millis(100));

        let slow = queue.add(async {
            sleep(Duration::from_secs(10)).await;
            "slow"
        });
        let fast = queue.add(async { "fast" });

        let fast = tokio::time::timeout(Duration::from_secs(1), fast).await;
        assert_eq!(fast.unwrap(), Ok("fast"));

        // The abandoned task still delivers its own result.
        assert_eq!(slow.await, Ok("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_drops_pending_but_not_running() {
        let queue = Queue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = queue.add(async move {
            let _ = release_rx.await;
            1
        });
        sleep(Duration::from_millis(1)).await;
        let pending = queue.add(async { 2 });
        assert_eq!(queue.len(), 1);

        queue.destroy();
        assert!(queue.is_empty());
        assert_eq!(pending.await, Err(QueueError::Dropped));

        release_tx.send(()).unwrap();
        assert_eq!(running.await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_reports_error_and_queue_continues() {
        let queue = Queue::new();
        let boom = queue.add(async {
            panic!("boom");
        });
        let after = queue.add(async { "after" });

        let boom: QueueResult<()> = boom.await;
        assert_eq!(boom, Err(QueueError::Panicked));
        assert_eq!(after.await, Ok("after"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_is_pending_until_task_finishes() {
        let queue = Queue::new();
        let (tx, rx) = oneshot::channel::<u8>();

        let mut result = task::spawn(queue.add(async move { rx.await.unwrap_or(0) }));
        assert_pending!(result.poll());

        tx.send(7).unwrap();
        sleep(Duration::from_millis(1)).await;
        assert!(result.is_woken());
        assert_eq!(assert_ready!(result.poll()), Ok(7));
    }
}
