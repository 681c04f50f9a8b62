//! Platform collaborator trait.
//!
//! The chat-platform client (gateway connection, REST calls) lives outside
//! Warden. The host only needs the small surface described by [`Platform`]:
//!
//! - a named-event source the relay can subscribe to,
//! - guild membership queries,
//! - application-command REST calls used to reconcile slash commands.
//!
//! # Example
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Platform for GatewayClient {
//!     fn subscribe(&self, event: &str, listener: RawListener) -> SubscriptionId {
//!         self.emitter.on(event, listener)
//!     }
//!
//!     async fn is_member_of(&self, guild: &GuildId) -> bool {
//!         self.cache.guilds.contains_key(guild.as_str())
//!     }
//!     // ...
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlatformResult;
use crate::types::GuildId;

// =============================================================================
// Raw events
// =============================================================================

/// A platform event as delivered by the client: a name and positional
/// arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub args: Vec<Value>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Handle returned by [`Platform::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Low-level platform listener.
pub type RawListener = Arc<dyn Fn(RawEvent) -> BoxFuture<'static, ()> + Send + Sync>;

// =============================================================================
// Application commands
// =============================================================================

/// An application command as registered on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Value,
}

impl ApplicationCommand {
    /// The definition part of this command, for comparison with a desired one.
    pub fn definition(&self) -> CommandDefinition {
        CommandDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            options: self.options.clone(),
        }
    }
}

/// The desired shape of an application command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Value,
}

// =============================================================================
// Platform trait
// =============================================================================

/// The connected platform client.
///
/// Application-command calls take `guild: None` for global commands.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Registers a listener for a named event.
    fn subscribe(&self, event: &str, listener: RawListener) -> SubscriptionId;

    /// Removes a listener registered with [`subscribe`](Self::subscribe).
    fn unsubscribe(&self, id: SubscriptionId);

    /// Whether the client is currently a member of `guild`.
    async fn is_member_of(&self, guild: &GuildId) -> bool;

    /// Guilds the client is currently a member of.
    async fn guild_ids(&self) -> Vec<GuildId>;

    async fn list_application_commands(
        &self,
        guild: Option<&GuildId>,
    ) -> PlatformResult<Vec<ApplicationCommand>>;

    async fn create_application_command(
        &self,
        guild: Option<&GuildId>,
        command: &CommandDefinition,
    ) -> PlatformResult<ApplicationCommand>;

    async fn edit_application_command(
        &self,
        guild: Option<&GuildId>,
        id: &str,
        command: &CommandDefinition,
    ) -> PlatformResult<ApplicationCommand>;

    async fn delete_application_command(
        &self,
        guild: Option<&GuildId>,
        id: &str,
    ) -> PlatformResult<()>;
}

/// A shared platform trait object.
pub type BoxedPlatform = Arc<dyn Platform>;

impl fmt::Debug for dyn Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Platform")
    }
}
