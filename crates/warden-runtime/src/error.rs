//! Runtime error types.

use thiserror::Error;
use warden_framework::PluginError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Host configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The plugin framework rejected the setup or an unload failed.
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
