//! Unified error types for the Warden core primitives.
//!
//! Plugin-level errors (load failures, capability misuse, config validation)
//! are defined in `warden-framework`.

use thiserror::Error;

// =============================================================================
// Lock Errors
// =============================================================================

/// Errors returned while waiting on a [`Lock`](crate::sync::Lock).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock (or the manager that issued it) was destroyed while a waiter
    /// was still pending.
    #[error("lock was destroyed while waiting")]
    Destroyed,
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Errors returned by [`Queue::add`](crate::sync::Queue::add).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The task was still pending when the queue was destroyed.
    #[error("queued task was dropped before it ran")]
    Dropped,

    /// The task panicked while running.
    #[error("queued task panicked")]
    Panicked,
}

// =============================================================================
// Platform Errors
// =============================================================================

/// Errors reported by a [`Platform`](crate::platform::Platform) implementation.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The platform client is not connected.
    #[error("platform client is not connected")]
    NotConnected,

    /// A REST call failed.
    #[error("platform request '{action}' failed: {reason}")]
    Request {
        /// The action that was attempted.
        action: String,
        /// Reason for failure.
        reason: String,
    },
}

impl PlatformError {
    /// Creates a request error.
    pub fn request(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Request {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Result type for queued tasks.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;
