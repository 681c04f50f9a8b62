//! Plugin configuration: options, context snapshots and matching.
//!
//! - [`PluginOptions`] is the per-plugin section of a context's config
//!   (`config` + `overrides`), merged over the blueprint's defaults.
//! - [`ContextConfig`] is the snapshot a [`ConfigSource`] returns for one
//!   context: command prefix, level map and plugin sections.
//! - [`PluginConfigManager`] is what a loaded plugin uses to resolve its
//!   effective config for a message, member, channel or user.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::{ContextId, GuildId, InteractionInfo, MemberInfo, MessageInfo, UserInfo};

use crate::error::{ConfigValidationError, SharedError};
use crate::overrides::{ExtraPredicate, MatchParams, Override, get_matching_config, merge_config};

/// Command prefix used when a context does not set one.
pub const DEFAULT_PREFIX: &str = "!";

/// Validates (and may normalise) a plugin config value.
pub type ConfigParser = Arc<dyn Fn(Value) -> Result<Value, ConfigValidationError> + Send + Sync>;

fn empty_object() -> Value {
    Value::Object(Map::new())
}

// =============================================================================
// PluginOptions
// =============================================================================

/// One plugin's configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginOptions {
    #[serde(default = "empty_object")]
    pub config: Value,

    #[serde(default)]
    pub overrides: Vec<Override>,

    /// Drop the blueprint's default overrides instead of appending after them.
    #[serde(default, alias = "replaceDefaultOverrides")]
    pub replace_default_overrides: bool,

    /// Consulted by the default enabled-plugin policy; `None` counts as enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            config: empty_object(),
            overrides: Vec::new(),
            replace_default_overrides: false,
            enabled: None,
        }
    }
}

impl PluginOptions {
    pub fn with_config(config: Value) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_override(mut self, item: Override) -> Self {
        self.overrides.push(item);
        self
    }

    /// Layers user options over blueprint defaults.
    ///
    /// Config deep-merges; overrides append unless the user replaces them.
    pub fn merged(defaults: &PluginOptions, user: Option<&PluginOptions>) -> PluginOptions {
        let Some(user) = user else {
            return defaults.clone();
        };

        let mut config = defaults.config.clone();
        merge_config(&mut config, &user.config);

        let overrides = if user.replace_default_overrides {
            user.overrides.clone()
        } else {
            defaults
                .overrides
                .iter()
                .chain(user.overrides.iter())
                .cloned()
                .collect()
        };

        PluginOptions {
            config,
            overrides,
            replace_default_overrides: user.replace_default_overrides,
            enabled: user.enabled,
        }
    }
}

// =============================================================================
// ContextConfig
// =============================================================================

/// Config snapshot for one context, fetched once per load.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub prefix: Option<String>,

    /// Level per user id or role id.
    #[serde(default)]
    pub levels: HashMap<String, i64>,

    #[serde(default)]
    pub plugins: HashMap<String, PluginOptions>,
}

impl ContextConfig {
    pub fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    /// Plugin names whose section is not explicitly disabled.
    pub fn enabled_plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .plugins
            .iter()
            .filter(|(_, options)| options.enabled != Some(false))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

// =============================================================================
// ConfigSource
// =============================================================================

/// Config backend consulted once per context load.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get_config(&self, context: &ContextId) -> Result<ContextConfig, SharedError>;
}

/// Serves fixed snapshots: one for the global context, one per known guild,
/// and a fallback for every other guild.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    global: ContextConfig,
    guilds: HashMap<GuildId, ContextConfig>,
    fallback: ContextConfig,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, config: ContextConfig) -> Self {
        self.global = config;
        self
    }

    pub fn guild(mut self, id: impl Into<GuildId>, config: ContextConfig) -> Self {
        self.guilds.insert(id.into(), config);
        self
    }

    pub fn fallback(mut self, config: ContextConfig) -> Self {
        self.fallback = config;
        self
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get_config(&self, context: &ContextId) -> Result<ContextConfig, SharedError> {
        Ok(match context {
            ContextId::Global => self.global.clone(),
            ContextId::Guild(id) => self.guilds.get(id).unwrap_or(&self.fallback).clone(),
        })
    }
}

// =============================================================================
// PluginConfigManager
// =============================================================================

/// Resolves a plugin's effective configuration.
#[derive(Clone)]
pub struct PluginConfigManager {
    options: PluginOptions,
    levels: Arc<HashMap<String, i64>>,
    extra: Option<ExtraPredicate>,
}

impl PluginConfigManager {
    /// Merges `user` over `defaults` and validates the result with `parser`.
    ///
    /// The parser runs against the base config (its output replaces it) and
    /// against the base merged with each override's patch.
    pub fn init(
        defaults: &PluginOptions,
        user: Option<&PluginOptions>,
        levels: Arc<HashMap<String, i64>>,
        parser: Option<&ConfigParser>,
        extra: Option<ExtraPredicate>,
    ) -> Result<Self, ConfigValidationError> {
        let mut options = PluginOptions::merged(defaults, user);

        if let Some(parser) = parser {
            options.config = parser(options.config)?;
            for item in &options.overrides {
                let mut patched = options.config.clone();
                merge_config(&mut patched, &item.config);
                parser(patched)?;
            }
        }

        Ok(Self {
            options,
            levels,
            extra,
        })
    }

    /// Base config, without overrides.
    pub fn get(&self) -> &Value {
        &self.options.config
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, ConfigValidationError> {
        Ok(serde_json::from_value(self.options.config.clone())?)
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    pub fn get_matching_config(&self, params: &MatchParams) -> Value {
        get_matching_config(
            &self.options.config,
            &self.options.overrides,
            params,
            self.extra.as_ref(),
        )
    }

    pub fn get_matching_config_as<T: DeserializeOwned>(
        &self,
        params: &MatchParams,
    ) -> Result<T, ConfigValidationError> {
        Ok(serde_json::from_value(self.get_matching_config(params))?)
    }

    /// Highest level among the user id and each role id; 0 when none is listed.
    pub fn member_level(&self, user_id: &str, roles: &[String]) -> i64 {
        std::iter::once(user_id)
            .chain(roles.iter().map(String::as_str))
            .filter_map(|id| self.levels.get(id).copied())
            .max()
            .unwrap_or(0)
    }

    /// Builds match parameters from whatever the caller knows.
    pub fn get_match_params(
        &self,
        member: Option<&MemberInfo>,
        user: Option<&UserInfo>,
        channel_id: Option<&str>,
        category_id: Option<&str>,
        thread_id: Option<&str>,
    ) -> MatchParams {
        let user_id = member.map(|m| &m.user).or(user).map(|u| u.id.clone());
        let roles = member.map(|m| m.roles.clone());

        let level = match (&user_id, &roles) {
            (Some(id), Some(roles)) => Some(self.member_level(id, roles)),
            (Some(id), None) => Some(self.member_level(id, &[])),
            _ => None,
        };

        MatchParams {
            level,
            user_id,
            channel_id: channel_id.map(str::to_string),
            category_id: category_id.map(str::to_string),
            thread_id: thread_id.map(str::to_string),
            member_roles: roles,
            extra: Value::Null,
        }
    }

    pub fn get_for_message(&self, message: &MessageInfo) -> Value {
        let params = self.get_match_params(
            message.member.as_ref(),
            Some(&message.author),
            Some(&message.channel_id),
            message.category_id.as_deref(),
            message.thread_id.as_deref(),
        );
        self.get_matching_config(&params)
    }

    pub fn get_for_interaction(&self, interaction: &InteractionInfo) -> Value {
        let params = self.get_match_params(
            interaction.member.as_ref(),
            Some(&interaction.user),
            interaction.channel_id.as_deref(),
            interaction.category_id.as_deref(),
            None,
        );
        self.get_matching_config(&params)
    }

    pub fn get_for_member(&self, member: &MemberInfo) -> Value {
        self.get_matching_config(&self.get_match_params(Some(member), None, None, None, None))
    }

    pub fn get_for_user(&self, user: &UserInfo) -> Value {
        self.get_matching_config(&self.get_match_params(None, Some(user), None, None, None))
    }

    pub fn get_for_channel(&self, channel_id: &str, category_id: Option<&str>) -> Value {
        self.get_matching_config(&self.get_match_params(
            None,
            None,
            Some(channel_id),
            category_id,
            None,
        ))
    }
}

impl fmt::Debug for PluginConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfigManager")
            .field("options", &self.options)
            .field("levels", &self.levels.len())
            .field("has_extra", &self.extra.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> PluginOptions {
        serde_json::from_value(value).unwrap()
    }

    fn member(id: &str, roles: &[&str]) -> MemberInfo {
        MemberInfo {
            user: UserInfo {
                id: id.into(),
                ..Default::default()
            },
            guild_id: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_user_options_layer_over_defaults() {
        let defaults = options(json!({
            "config": { "a": 1, "b": { "x": 1 } },
            "overrides": [{ "level": 50, "config": { "a": 2 } }]
        }));
        let user = options(json!({
            "config": { "b": { "y": 2 } },
            "overrides": [{ "level": 100, "config": { "a": 3 } }]
        }));

        let merged = PluginOptions::merged(&defaults, Some(&user));
        assert_eq!(merged.config, json!({ "a": 1, "b": { "x": 1, "y": 2 } }));
        assert_eq!(merged.overrides.len(), 2);

        let replacing = options(json!({
            "replaceDefaultOverrides": true,
            "overrides": [{ "level": 100, "config": { "a": 3 } }]
        }));
        let merged = PluginOptions::merged(&defaults, Some(&replacing));
        assert_eq!(merged.overrides.len(), 1);
        assert_eq!(merged.overrides[0].config, json!({ "a": 3 }));
    }

    #[test]
    fn test_member_level_is_max_of_user_and_roles() {
        let levels = Arc::new(HashMap::from([
            ("u1".to_string(), 10),
            ("mod".to_string(), 50),
            ("admin".to_string(), 100),
        ]));
        let manager =
            PluginConfigManager::init(&PluginOptions::default(), None, levels, None, None).unwrap();

        assert_eq!(manager.member_level("u1", &["mod".into()]), 50);
        assert_eq!(manager.member_level("u1", &[]), 10);
        assert_eq!(manager.member_level("nobody", &[]), 0);
        assert_eq!(
            manager.member_level("u1", &["mod".into(), "admin".into()]),
            100
        );
    }

    #[test]
    fn test_get_for_member_applies_level_override() {
        let levels = Arc::new(HashMap::from([("mod".to_string(), 50)]));
        let defaults = options(json!({
            "config": { "can_warn": false },
            "overrides": [{ "level": ">=50", "config": { "can_warn": true } }]
        }));
        let manager = PluginConfigManager::init(&defaults, None, levels, None, None).unwrap();

        assert_eq!(
            manager.get_for_member(&member("u", &["mod"])),
            json!({ "can_warn": true })
        );
        assert_eq!(
            manager.get_for_member(&member("u", &[])),
            json!({ "can_warn": false })
        );
        // No user at all: level criteria cannot match.
        assert_eq!(
            manager.get_for_channel("c1", None),
            json!({ "can_warn": false })
        );
    }

    #[test]
    fn test_parser_rejects_bad_override() {
        let parser: ConfigParser = Arc::new(|value: Value| {
            if value.get("limit").and_then(Value::as_i64).unwrap_or(0) < 0 {
                Err(ConfigValidationError::new("limit must be >= 0"))
            } else {
                Ok(value)
            }
        });

        let good = options(json!({ "config": { "limit": 5 } }));
        assert!(
            PluginConfigManager::init(&good, None, Arc::default(), Some(&parser), None).is_ok()
        );

        let bad = good
            .clone()
            .with_override(Override::from_value(json!({ "level": 1, "config": { "limit": -1 } })).unwrap());
        let err = PluginConfigManager::init(&bad, None, Arc::default(), Some(&parser), None)
            .unwrap_err();
        assert_eq!(err.message, "limit must be >= 0");
    }

    #[test]
    fn test_enabled_names_skip_disabled() {
        let config: ContextConfig = serde_json::from_value(json!({
            "plugins": {
                "b": {},
                "a": { "enabled": true },
                "c": { "enabled": false }
            }
        }))
        .unwrap();
        assert_eq!(config.enabled_plugin_names(), vec!["a", "b"]);
        assert_eq!(config.prefix(), DEFAULT_PREFIX);
    }

    #[tokio::test]
    async fn test_static_source_falls_back_for_unknown_guilds() {
        let source = StaticConfigSource::new()
            .guild(
                "g1",
                ContextConfig {
                    prefix: Some("?".into()),
                    ..Default::default()
                },
            )
            .fallback(ContextConfig {
                prefix: Some("$".into()),
                ..Default::default()
            });

        let g1 = source.get_config(&ContextId::Guild("g1".into())).await.unwrap();
        let other = source.get_config(&ContextId::Guild("g2".into())).await.unwrap();
        assert_eq!(g1.prefix(), "?");
        assert_eq!(other.prefix(), "$");
    }
}
