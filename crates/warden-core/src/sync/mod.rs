//! Concurrency primitives used by the plugin orchestrator.
//!
//! - [`LockManager`] / [`Lock`]: cooperative multi-key mutual exclusion.
//! - [`Queue`]: per-key FIFO serializer with a liveness timeout.
//! - [`ConcurrentRunner`]: bounded parallelism for independent tasks.

mod lock;
mod queue;
mod runner;

pub use lock::{DEFAULT_LOCK_GC_INTERVAL, DEFAULT_LOCK_TIMEOUT, Lock, LockManager, LockState};
pub use queue::{DEFAULT_QUEUE_TIMEOUT, Queue};
pub use runner::ConcurrentRunner;
