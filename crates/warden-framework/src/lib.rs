//! # Warden Framework
//!
//! Plugin declarations and the machinery that instantiates them per guild.
//!
//! This layer provides:
//! - [`Blueprint`]: a static plugin declaration (hooks, events, commands,
//!   dependencies, default options)
//! - [`PluginManager`]: loads and unloads guild and global contexts through
//!   the phase machine, serialized per guild
//! - [`PluginData`]: the per-context plugin handle with config, locks,
//!   cooldowns, events and commands
//! - Override evaluation for level/user/channel/role-scoped config
//! - [`EventRelay`]: one platform subscription per event name, fanned out to
//!   guild-scoped and any-scoped plugin listeners
//!
//! ```text
//!   Platform ──► EventRelay ──► PluginEventManager (per plugin) ──► handler
//!                    ▲
//!   PluginManager ───┴── Context (per guild) ──► PluginData (per plugin)
//! ```

pub mod blueprint;
pub mod commands;
pub mod config;
pub mod context;
pub mod cooldown;
pub mod error;
pub mod events;
pub mod manager;
pub mod overrides;
pub mod plugin_data;
pub mod profiler;
pub mod relay;

pub use blueprint::{Blueprint, BlueprintBuilder, EventHandlerFn, HookFn};
pub use commands::{
    CommandSyncPlan, MessageCommandBlueprint, MessageCommandCall, PluginCommandManager,
    SlashCommandBlueprint, SlashCommandCall, plan_command_sync, sync_application_commands,
};
pub use config::{
    ConfigSource, ContextConfig, DEFAULT_PREFIX, PluginConfigManager, PluginOptions,
    StaticConfigSource,
};
pub use context::{Context, LoadedPlugin};
pub use cooldown::CooldownManager;
pub use error::{
    ConfigValidationError, HookKind, PluginError, PluginLoadError, PluginPhase, PluginResult,
    SharedError,
};
pub use events::PluginEventManager;
pub use manager::{LifecycleEvent, ManagerOptions, PluginManager, PluginManagerBuilder};
pub use overrides::{Criteria, Criterion, LevelRange, MatchParams, Override, merge_config};
pub use plugin_data::{PluginData, StateMap};
pub use profiler::{Profiler, ProfilerDataPoint};
pub use relay::{EventRelay, ListenerId};

/// Convenience re-exports for plugin authors.
pub mod prelude {
    pub use super::blueprint::Blueprint;
    pub use super::commands::{
        MessageCommandBlueprint, MessageCommandCall, SlashCommandBlueprint, SlashCommandCall,
    };
    pub use super::config::{ContextConfig, PluginOptions};
    pub use super::error::{PluginError, PluginResult};
    pub use super::overrides::{MatchParams, Override};
    pub use super::plugin_data::PluginData;
    pub use tower::BoxError;
    pub use warden_core::prelude::*;
}
