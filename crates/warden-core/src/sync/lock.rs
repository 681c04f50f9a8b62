//! Cooperative, timeout-bounded mutual exclusion over string keys.
//!
//! A [`LockManager`] hands out [`Lock`]s. Each call to
//! [`acquire`](LockManager::acquire) registers a new lock as the *latest*
//! request for every key it names, and the lock is granted only once every
//! previously registered lock for any of those keys has been granted and then
//! released:
//!
//! ```text
//! acquire(["a"])      L1 ──────unlock──┐
//! acquire(["b"])      L2 ──────────────┼──────unlock──┐
//! acquire(["a","b"])  L3 ··· pending ··┴··· pending ··┴── granted
//! ```
//!
//! Exclusion is advisory: a lock that is never unlocked releases itself after
//! its timeout so a crashed holder cannot deadlock the chain.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{LockError, LockResult};

/// Default time after which a granted lock releases itself.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between sweeps of released key records.
pub const DEFAULT_LOCK_GC_INTERVAL: Duration = Duration::from_secs(120);

/// Lifecycle of a single [`Lock`].
///
/// Transitions only move forward:
///
/// ```text
/// Pending ──► Held ──► Unlocked
///    │          │
///    └──────────┴────► Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Registered with a manager, waiting for predecessors to release.
    Pending,
    /// Granted to the caller.
    Held,
    /// Released, either explicitly or by timeout.
    Unlocked,
    /// Destroyed on shutdown; waiters are rejected.
    Destroyed,
}

struct LockInner {
    keys: Vec<String>,
    timeout: Duration,
    interrupted: AtomicBool,
    state: watch::Sender<LockState>,
    timer: CancellationToken,
}

/// A single-use mutual exclusion token over one or more keys.
///
/// Cloning a `Lock` yields another handle to the same token.
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

impl Lock {
    /// Creates an already-granted lock.
    ///
    /// The new lock is interrupted if any of `old_locks` was interrupted, so
    /// cancellation propagates through a chain of locks. The auto-unlock timer
    /// starts immediately. Must be called from within a Tokio runtime.
    pub fn new(old_locks: &[Lock], timeout: Duration) -> Self {
        let lock = Self::pending(Vec::new(), timeout);
        lock.grant(old_locks);
        lock
    }

    fn pending(keys: Vec<String>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(LockState::Pending);
        Self {
            inner: Arc::new(LockInner {
                keys,
                timeout,
                interrupted: AtomicBool::new(false),
                state,
                timer: CancellationToken::new(),
            }),
        }
    }

    /// Moves a pending lock to [`LockState::Held`] and arms its timeout.
    fn grant(&self, old_locks: &[Lock]) {
        if old_locks.iter().any(Lock::is_interrupted) {
            self.inner.interrupted.store(true, Ordering::SeqCst);
        }

        let granted = self.inner.state.send_if_modified(|state| {
            if *state == LockState::Pending {
                *state = LockState::Held;
                true
            } else {
                false
            }
        });

        if granted {
            trace!(keys = ?self.inner.keys, "Lock granted");
            self.arm_timeout();
        }
    }

    fn arm_timeout(&self) {
        let weak = Arc::downgrade(&self.inner);
        let token = self.inner.timer.clone();
        let timeout = self.inner.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        debug!(
                            keys = ?inner.keys,
                            timeout_ms = timeout.as_millis() as u64,
                            "Lock was not released in time, unlocking"
                        );
                        Lock { inner }.unlock();
                    }
                }
            }
        });
    }

    /// Releases the lock. Idempotent; a released lock never re-locks.
    pub fn unlock(&self) {
        let released = self.inner.state.send_if_modified(|state| {
            if *state == LockState::Held {
                *state = LockState::Unlocked;
                true
            } else {
                false
            }
        });

        if released {
            self.inner.timer.cancel();
            trace!(keys = ?self.inner.keys, "Lock released");
        }
    }

    /// Marks the lock interrupted, then releases it.
    ///
    /// Every lock subsequently granted on the same keys inherits the flag.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        self.unlock();
    }

    /// Rejects every pending waiter. Used on shutdown.
    ///
    /// A lock that was already released stays released.
    pub fn destroy(&self) {
        let destroyed = self.inner.state.send_if_modified(|state| match state {
            LockState::Pending | LockState::Held => {
                *state = LockState::Destroyed;
                true
            }
            LockState::Unlocked | LockState::Destroyed => false,
        });

        if destroyed {
            self.inner.timer.cancel();
        }
    }

    /// Resolves once the lock has been released.
    ///
    /// Returns [`LockError::Destroyed`] if the lock is destroyed first.
    pub fn unlocked(&self) -> impl Future<Output = LockResult<()>> + Send + 'static {
        let mut rx = self.inner.state.subscribe();
        async move {
            let state = *rx
                .wait_for(|s| matches!(s, LockState::Unlocked | LockState::Destroyed))
                .await
                .map_err(|_| LockError::Destroyed)?;
            match state {
                LockState::Unlocked => Ok(()),
                _ => Err(LockError::Destroyed),
            }
        }
    }

    async fn granted(&self) -> LockResult<()> {
        let mut rx = self.inner.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != LockState::Pending)
            .await
            .map_err(|_| LockError::Destroyed)?;
        match state {
            LockState::Destroyed => Err(LockError::Destroyed),
            _ => Ok(()),
        }
    }

    /// Whether this lock, or any lock it was chained on, was interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Whether the lock has been released.
    pub fn is_unlocked(&self) -> bool {
        self.state() == LockState::Unlocked
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LockState {
        *self.inner.state.borrow()
    }

    /// Keys this lock was acquired for. Empty for locks built with [`Lock::new`].
    pub fn keys(&self) -> &[String] {
        &self.inner.keys
    }

    /// Auto-unlock timeout.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    fn ptr_eq(&self, other: &Lock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("keys", &self.inner.keys)
            .field("state", &self.state())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

// =============================================================================
// LockManager
// =============================================================================

struct ManagerState {
    /// Most recently requested lock for each key.
    tails: HashMap<String, Lock>,
    /// Every issued lock that has not been released yet.
    live: Vec<Lock>,
    destroyed: bool,
    last_gc: Instant,
}

impl ManagerState {
    fn collect_garbage(&mut self) -> usize {
        let before = self.tails.len();
        self.tails
            .retain(|_, lock| matches!(lock.state(), LockState::Pending | LockState::Held));
        self.last_gc = Instant::now();
        before - self.tails.len()
    }
}

/// Issues [`Lock`]s and chains same-key requests in registration order.
///
/// One manager is owned by each plugin context and shared by every plugin
/// loaded in it.
pub struct LockManager {
    default_timeout: Duration,
    gc_interval: Duration,
    state: Mutex<ManagerState>,
}

impl LockManager {
    /// Creates a manager with [`DEFAULT_LOCK_TIMEOUT`] and [`DEFAULT_LOCK_GC_INTERVAL`].
    pub fn new() -> Self {
        Self::with_options(DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_GC_INTERVAL)
    }

    /// Creates a manager with a custom default timeout and GC interval.
    pub fn with_options(default_timeout: Duration, gc_interval: Duration) -> Self {
        Self {
            default_timeout,
            gc_interval,
            state: Mutex::new(ManagerState {
                tails: HashMap::new(),
                live: Vec::new(),
                destroyed: false,
                last_gc: Instant::now(),
            }),
        }
    }

    /// Requests a lock over `keys`.
    ///
    /// The request is registered synchronously, before the returned future is
    /// polled, so requests on the same key are granted in call order. The
    /// future resolves once every earlier lock on any of the keys has been
    /// released, or fails with [`LockError::Destroyed`] if the manager (or an
    /// earlier lock in the chain) is destroyed first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn acquire<I, K>(
        &self,
        keys: I,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<Lock>> + Send + 'static
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let lock = Lock::pending(keys.clone(), timeout.unwrap_or(self.default_timeout));

        let predecessors = {
            let mut state = self.state.lock();
            if state.destroyed {
                None
            } else {
                if state.last_gc.elapsed() >= self.gc_interval {
                    let removed = state.collect_garbage();
                    trace!(removed, "Collected released lock records");
                }

                state
                    .live
                    .retain(|l| matches!(l.state(), LockState::Pending | LockState::Held));
                state.live.push(lock.clone());

                let mut preds: Vec<Lock> = Vec::new();
                for key in &keys {
                    if let Some(prev) = state.tails.insert(key.clone(), lock.clone())
                        && !preds.iter().any(|p| p.ptr_eq(&prev))
                    {
                        preds.push(prev);
                    }
                }
                Some(preds)
            }
        };

        match predecessors {
            None => lock.destroy(),
            Some(preds) if preds.is_empty() => lock.grant(&[]),
            Some(preds) => {
                let waiting = lock.clone();
                tokio::spawn(async move {
                    let released = join_all(preds.iter().map(Lock::unlocked)).await;
                    if released.iter().any(Result::is_err) {
                        waiting.destroy();
                    } else {
                        waiting.grant(&preds);
                    }
                });
            }
        }

        async move {
            lock.granted().await?;
            Ok(lock)
        }
    }

    /// Drops records for keys whose latest lock has been released.
    ///
    /// Runs automatically on `acquire` once per GC interval. Returns the
    /// number of records removed.
    pub fn collect_garbage(&self) -> usize {
        self.state.lock().collect_garbage()
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.state.lock().tails.len()
    }

    /// Destroys every outstanding lock and rejects future requests.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        let live: Vec<Lock> = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.tails.clear();
            std::mem::take(&mut state.live)
        };

        for lock in live {
            lock.destroy();
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LockManager")
            .field("default_timeout", &self.default_timeout)
            .field("keys", &state.tails.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
