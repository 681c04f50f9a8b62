//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_framework::{ContextConfig, ManagerOptions, StaticConfigSource};

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Plugin manager tunables.
    #[serde(default)]
    pub host: HostConfig,

    /// Per-context plugin configuration.
    #[serde(default)]
    pub contexts: ContextsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `Full` without it.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation period for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Minutely,
    Hourly,
    Daily,
}

/// Which span lifecycle events to log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
    /// Log file for `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rotated files to keep; unlimited when unset.
    pub max_files: Option<usize>,
    /// Per-module levels, e.g. `warden_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Host
// =============================================================================

/// Plugin manager tunables, in milliseconds where timed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub concurrent_guild_loads: usize,
    pub guild_queue_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub lock_gc_interval_ms: u64,
    pub listener_drain_timeout_ms: u64,
    pub cooldown_cleanup_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from_options(&ManagerOptions::default())
    }
}

impl HostConfig {
    fn from_options(options: &ManagerOptions) -> Self {
        Self {
            concurrent_guild_loads: options.concurrent_guild_loads,
            guild_queue_timeout_ms: options.guild_queue_timeout.as_millis() as u64,
            lock_timeout_ms: options.lock_timeout.as_millis() as u64,
            lock_gc_interval_ms: options.lock_gc_interval.as_millis() as u64,
            listener_drain_timeout_ms: options.listener_drain_timeout.as_millis() as u64,
            cooldown_cleanup_interval_ms: options.cooldown_cleanup_interval.as_millis() as u64,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            concurrent_guild_loads: self.concurrent_guild_loads,
            guild_queue_timeout: Duration::from_millis(self.guild_queue_timeout_ms),
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            lock_gc_interval: Duration::from_millis(self.lock_gc_interval_ms),
            listener_drain_timeout: Duration::from_millis(self.listener_drain_timeout_ms),
            cooldown_cleanup_interval: Duration::from_millis(self.cooldown_cleanup_interval_ms),
        }
    }
}

// =============================================================================
// Contexts
// =============================================================================

/// Plugin configuration per context, kept as raw values until validated.
///
/// ```toml
/// [contexts.default]
/// prefix = "!"
/// plugins.welcome = {}
///
/// [contexts.guilds.123456789]
/// levels = { "987654321" = 100 }
/// plugins.welcome = { config = { channel = "42" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextsConfig {
    /// The global context.
    pub global: Option<Value>,
    /// Guilds without their own entry.
    pub default: Option<Value>,
    /// Keyed by guild id.
    pub guilds: HashMap<String, Value>,
}

impl ContextsConfig {
    /// Parses every entry, naming the first one that fails.
    pub fn to_source(&self) -> ConfigResult<StaticConfigSource> {
        let mut source = StaticConfigSource::new();
        if let Some(global) = &self.global {
            source = source.global(parse_context(global, "contexts.global")?);
        }
        if let Some(default) = &self.default {
            source = source.fallback(parse_context(default, "contexts.default")?);
        }
        for (guild, value) in &self.guilds {
            let config = parse_context(value, &format!("contexts.guilds.{guild}"))?;
            source = source.guild(guild.as_str(), config);
        }
        Ok(source)
    }
}

fn parse_context(value: &Value, path: &str) -> ConfigResult<ContextConfig> {
    serde_json::from_value(value.clone())
        .map_err(|e| ConfigError::validation(format!("{path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_defaults_match_manager_defaults() {
        assert_eq!(
            HostConfig::default().manager_options(),
            ManagerOptions::default()
        );
        assert_eq!(HostConfig::default().lock_timeout_ms, 10_000);
    }

    #[test]
    fn test_contexts_to_source_reports_bad_entry() {
        let contexts = ContextsConfig {
            guilds: HashMap::from([("42".to_string(), json!({ "levels": "lots" }))]),
            ..Default::default()
        };
        let err = contexts.to_source().unwrap_err();
        assert!(err.to_string().contains("contexts.guilds.42"));
    }

    #[test]
    fn test_log_level_aliases() {
        let level: LogLevel = serde_json::from_value(json!("warning")).unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(level.to_tracing_level(), tracing::Level::WARN);
    }
}
