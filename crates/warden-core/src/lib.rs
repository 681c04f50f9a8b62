//! # Warden Core
//!
//! Leaf building blocks of the Warden plugin host.
//!
//! ## Modules
//!
//! - **Concurrency** ([`sync`]): [`LockManager`] for cooperative multi-key
//!   locking, [`Queue`] for per-guild serialization and [`ConcurrentRunner`]
//!   for bounded parallel guild loads.
//! - **Platform** ([`platform`]): the [`Platform`] trait the host consumes
//!   from an external chat client, plus raw events and application commands.
//! - **Events** ([`event`]): [`EventSpecs`] turning positional platform
//!   arguments into named [`EventArgs`] and resolving each event's guild.
//! - **Model** ([`model`]): message, member and interaction snapshots.
//!
//! ```text
//! ┌──────────┐  RawEvent  ┌────────────┐  EventArgs + GuildId  ┌──────────┐
//! │ Platform │───────────▶│ EventSpecs │──────────────────────▶│  Relay   │
//! └──────────┘            └────────────┘                       └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_core::LockManager;
//!
//! let locks = LockManager::new();
//! let lock = locks.acquire(["member:123"], None).await?;
//! // ... critical section ...
//! lock.unlock();
//! ```

pub mod error;
pub mod event;
pub mod model;
pub mod platform;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{
    LockError, LockResult, PlatformError, PlatformResult, QueueError, QueueResult,
};
pub use event::{EventArgs, EventSpec, EventSpecs, GuildExtractor};
pub use model::{InteractionInfo, MemberInfo, MessageInfo, UserInfo};
pub use platform::{
    ApplicationCommand, BoxedPlatform, CommandDefinition, Platform, RawEvent, RawListener,
    SubscriptionId,
};
pub use sync::{
    ConcurrentRunner, DEFAULT_LOCK_GC_INTERVAL, DEFAULT_LOCK_TIMEOUT, DEFAULT_QUEUE_TIMEOUT, Lock,
    LockManager, LockState, Queue,
};
pub use types::{ContextId, GuildId};

/// Re-exported so platform implementations don't need a direct dependency.
pub use async_trait::async_trait;
pub use futures::future::BoxFuture;

/// Prelude for common imports.
pub mod prelude {
    pub use super::event::{EventArgs, EventSpec, EventSpecs};
    pub use super::model::*;
    pub use super::platform::{BoxedPlatform, Platform, RawEvent, RawListener};
    pub use super::sync::{ConcurrentRunner, Lock, LockManager, Queue};
    pub use super::types::{ContextId, GuildId};
}
