//! Configuration module for the Warden runtime.
//!
//! This module provides figment-based loading and validation for host
//! settings, logging, and the per-context plugin configuration served to the
//! plugin manager.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    ContextsConfig, HostConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig, WardenConfig,
};
pub use validation::validate_config;
