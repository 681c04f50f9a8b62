//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{HostConfig, LogOutput, LoggingConfig, WardenConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &WardenConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_host_config(&config.host)?;
    validate_guild_ids(config.contexts.guilds.keys())?;

    // Surfaces malformed context entries at startup instead of at first load.
    config.contexts.to_source()?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.max_files == Some(0) {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter module name: {module:?}"
        )));
    }

    Ok(())
}

fn validate_host_config(host: &HostConfig) -> ConfigResult<()> {
    if host.concurrent_guild_loads == 0 {
        return Err(ConfigError::validation(
            "host.concurrent_guild_loads must be greater than 0",
        ));
    }

    let timeouts = [
        ("host.guild_queue_timeout_ms", host.guild_queue_timeout_ms),
        ("host.lock_timeout_ms", host.lock_timeout_ms),
        ("host.lock_gc_interval_ms", host.lock_gc_interval_ms),
        ("host.listener_drain_timeout_ms", host.listener_drain_timeout_ms),
        ("host.cooldown_cleanup_interval_ms", host.cooldown_cleanup_interval_ms),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "{field} must be greater than 0"
            )));
        }
    }

    Ok(())
}

fn validate_guild_ids<'a>(ids: impl Iterator<Item = &'a String>) -> ConfigResult<()> {
    for id in ids {
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidContextId(id.clone()));
        }
    }
    Ok(())
}
