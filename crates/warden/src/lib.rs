//! # Warden
//!
//! A plugin host for chat bots. Plugins are declared once as blueprints and
//! instantiated per guild, each guild with its own configuration, locks,
//! cooldowns, event listeners and commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  guild events  ┌───────────────┐  per guild  ┌─────────┐
//! │ Platform │───────────────▶│ PluginManager │────────────▶│ Context │──▶ PluginData × N
//! └──────────┘                └───────────────┘             └─────────┘
//!       │                            │
//!       └────── EventRelay ◀─────────┘  (one platform subscription per event)
//! ```
//!
//! - **Core** ([`core`]): platform trait, event specs, locks and queues
//! - **Framework** ([`framework`]): blueprints, the plugin manager, config
//!   overrides, commands and the event relay
//! - **Runtime** ([`runtime`]): configuration loading, logging and the host
//!   loop that connects platform guild events to the manager
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let welcome = Blueprint::builder("welcome")
//!         .event("guildMemberAdd", |data, args| async move {
//!             info!(guild = %data.context_id(), "Member joined");
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     let runtime = WardenRuntime::builder(platform)
//!         .guild_plugin(welcome)
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: load `warden.toml`
//! - `yaml-config`: load `warden.yaml`
//! - `json-log`: JSON log lines
//! - `testing`: in-memory `MockPlatform`

pub use warden_core as core;
pub use warden_framework as framework;
pub use warden_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use warden::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use warden_runtime::{RuntimeBuilder, WardenConfig, WardenRuntime};

    // Plugin declaration and per-context handles
    pub use warden_framework::prelude::*;
    pub use warden_framework::{LifecycleEvent, PluginManager};

    // Logging macros
    pub use warden_runtime::prelude::*;
}
