//! Warden Runtime - host layer for the Warden plugin framework.
//!
//! This crate provides:
//! - Runtime orchestration ([`WardenRuntime`]): subscribes to platform
//!   ready and guild availability events and drives the plugin manager
//! - Configuration loading ([`ConfigLoader`]) from files, environment and
//!   code, including the per-context plugin configuration
//! - Logging setup ([`LoggingBuilder`])
//!
//! ```ignore
//! use warden_runtime::WardenRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = WardenRuntime::builder(platform)
//!         .guild_plugin(welcome::blueprint()?)
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! `warden.toml` is searched for in the current directory and the user
//! config directory. `WARDEN_*` environment variables override file values:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [host]
//! concurrent_guild_loads = 4
//!
//! [contexts.default]
//! plugins.welcome = { config = { channel = "42" } }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, ContextsConfig, HostConfig, LoggingConfig, Profile,
    WardenConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, WardenRuntime};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
