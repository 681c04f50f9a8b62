//! Message commands, slash commands and application-command reconciliation.
//!
//! Message commands are matched by the built-in `messageCreate` listener:
//!
//! ```text
//! "!warn @user spamming"
//!  │ └─┬┘ └────┬───────┘
//!  │ trigger   args (whitespace-split, kept as strings)
//!  prefix (context config, default "!")
//! ```
//!
//! A command with a `permission` key only runs when that key is `true` in
//! the plugin's matching config for the message author. A command with a
//! `cooldown` runs at most once per user per cooldown.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tower::BoxError;
use tracing::{debug, trace, warn};
use warden_core::{
    ApplicationCommand, CommandDefinition, EventArgs, GuildId, InteractionInfo, MessageInfo,
    Platform, PlatformResult,
};

use crate::plugin_data::PluginData;

// =============================================================================
// Blueprints
// =============================================================================

/// Arguments passed to a message command.
#[derive(Debug, Clone)]
pub struct MessageCommandCall {
    pub plugin: Arc<PluginData>,
    pub message: MessageInfo,
    /// The trigger that matched, as written in the blueprint.
    pub trigger: String,
    pub args: Vec<String>,
}

/// Arguments passed to a slash command.
#[derive(Debug, Clone)]
pub struct SlashCommandCall {
    pub plugin: Arc<PluginData>,
    pub interaction: InteractionInfo,
}

pub type MessageCommandFn =
    Arc<dyn Fn(MessageCommandCall) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub type SlashCommandFn =
    Arc<dyn Fn(SlashCommandCall) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A prefixed text command.
#[derive(Clone)]
pub struct MessageCommandBlueprint {
    pub triggers: Vec<String>,
    pub description: String,
    /// Config key that must be `true` for the author.
    pub permission: Option<String>,
    /// Per-user cooldown.
    pub cooldown: Option<Duration>,
    pub run: MessageCommandFn,
}

impl MessageCommandBlueprint {
    pub fn new<F, Fut>(trigger: impl Into<String>, run: F) -> Self
    where
        F: Fn(MessageCommandCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            triggers: vec![trigger.into()],
            description: String::new(),
            permission: None,
            cooldown: None,
            run: Arc::new(move |call| run(call).boxed()),
        }
    }

    pub fn alias(mut self, trigger: impl Into<String>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn permission(mut self, key: impl Into<String>) -> Self {
        self.permission = Some(key.into());
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Matches `content` against this command's triggers.
    ///
    /// The trigger must follow the prefix directly. Returns the matched
    /// trigger and the remaining arguments.
    pub fn parse<'a>(&'a self, prefix: &str, content: &str) -> Option<(&'a str, Vec<String>)> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        if rest.starts_with(char::is_whitespace) {
            return None;
        }
        let mut words = rest.split_whitespace();
        let word = words.next()?;
        let trigger = self
            .triggers
            .iter()
            .find(|trigger| trigger.eq_ignore_ascii_case(word))?;
        Some((trigger.as_str(), words.map(str::to_string).collect()))
    }
}

impl fmt::Debug for MessageCommandBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCommandBlueprint")
            .field("triggers", &self.triggers)
            .field("permission", &self.permission)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// An application (slash) command.
#[derive(Clone)]
pub struct SlashCommandBlueprint {
    pub name: String,
    pub description: String,
    pub options: Value,
    pub permission: Option<String>,
    pub run: SlashCommandFn,
}

impl SlashCommandBlueprint {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, run: F) -> Self
    where
        F: Fn(SlashCommandCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            options: Value::Array(Vec::new()),
            permission: None,
            run: Arc::new(move |call| run(call).boxed()),
        }
    }

    pub fn options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn permission(mut self, key: impl Into<String>) -> Self {
        self.permission = Some(key.into());
        self
    }

    pub fn definition(&self) -> CommandDefinition {
        CommandDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            options: self.options.clone(),
        }
    }
}

impl fmt::Debug for SlashCommandBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlashCommandBlueprint")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// PluginCommandManager
// =============================================================================

/// Commands registered by one loaded plugin.
#[derive(Debug, Default)]
pub struct PluginCommandManager {
    message: RwLock<Vec<MessageCommandBlueprint>>,
    slash: RwLock<Vec<SlashCommandBlueprint>>,
}

impl PluginCommandManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message_command(&self, command: MessageCommandBlueprint) {
        self.message.write().push(command);
    }

    pub fn add_slash_command(&self, command: SlashCommandBlueprint) {
        self.slash.write().push(command);
    }

    pub fn message_commands(&self) -> Vec<MessageCommandBlueprint> {
        self.message.read().clone()
    }

    pub fn slash_commands(&self) -> Vec<SlashCommandBlueprint> {
        self.slash.read().clone()
    }

    pub fn has_message_commands(&self) -> bool {
        !self.message.read().is_empty()
    }

    pub fn has_slash_commands(&self) -> bool {
        !self.slash.read().is_empty()
    }

    pub fn clear(&self) {
        self.message.write().clear();
        self.slash.write().clear();
    }
}

fn permitted(config: &Value, permission: Option<&String>) -> bool {
    match permission {
        Some(key) => config.get(key) == Some(&Value::Bool(true)),
        None => true,
    }
}

/// Built-in `messageCreate` listener body.
pub async fn dispatch_message(plugin: Arc<PluginData>, args: Arc<EventArgs>) -> Result<(), BoxError> {
    let Some(message) = args.get_as::<MessageInfo>("message") else {
        return Ok(());
    };
    if message.author.bot {
        return Ok(());
    }

    let prefix = plugin.prefix().to_string();
    for command in plugin.commands().message_commands() {
        let Some((trigger, command_args)) = command.parse(&prefix, &message.content) else {
            continue;
        };

        if command.permission.is_some() {
            let config = plugin.config().get_for_message(&message);
            if !permitted(&config, command.permission.as_ref()) {
                debug!(
                    plugin = %plugin.name(),
                    trigger,
                    user = %message.author.id,
                    "Command denied by permission"
                );
                return Ok(());
            }
        }

        if let Some(cooldown) = command.cooldown {
            let key = format!("command:{}:{}", command.triggers[0], message.author.id);
            if plugin.cooldowns().is_on_cooldown(&key) {
                trace!(plugin = %plugin.name(), trigger, "Command on cooldown");
                return Ok(());
            }
            plugin.cooldowns().set_cooldown(key, cooldown);
        }

        let call = MessageCommandCall {
            plugin: Arc::clone(&plugin),
            trigger: trigger.to_string(),
            args: command_args,
            message,
        };
        return (command.run)(call).await;
    }

    Ok(())
}

/// Built-in `interactionCreate` listener body.
pub async fn dispatch_interaction(
    plugin: Arc<PluginData>,
    args: Arc<EventArgs>,
) -> Result<(), BoxError> {
    let Some(interaction) = args.get_as::<InteractionInfo>("interaction") else {
        return Ok(());
    };

    let Some(command) = plugin
        .commands()
        .slash_commands()
        .into_iter()
        .find(|c| c.name == interaction.command_name)
    else {
        return Ok(());
    };

    if command.permission.is_some() {
        let config = plugin.config().get_for_interaction(&interaction);
        if !permitted(&config, command.permission.as_ref()) {
            debug!(
                plugin = %plugin.name(),
                command = %command.name,
                user = %interaction.user.id,
                "Slash command denied by permission"
            );
            return Ok(());
        }
    }

    let call = SlashCommandCall {
        plugin: Arc::clone(&plugin),
        interaction,
    };
    (command.run)(call).await
}

// =============================================================================
// Reconciliation
// =============================================================================

/// REST calls needed to bring the platform's commands in line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSyncPlan {
    pub create: Vec<CommandDefinition>,
    /// `(existing id, new definition)`.
    pub edit: Vec<(String, CommandDefinition)>,
    pub delete: Vec<String>,
}

impl CommandSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.edit.is_empty() && self.delete.is_empty()
    }
}

/// Diffs registered commands against desired ones, by name.
pub fn plan_command_sync(
    existing: &[ApplicationCommand],
    desired: &[CommandDefinition],
) -> CommandSyncPlan {
    let by_name: HashMap<&str, &ApplicationCommand> =
        existing.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut plan = CommandSyncPlan::default();
    for definition in desired {
        match by_name.get(definition.name.as_str()) {
            None => plan.create.push(definition.clone()),
            Some(current) if current.definition() != *definition => {
                plan.edit.push((current.id.clone(), definition.clone()));
            }
            Some(_) => {}
        }
    }

    plan.delete = existing
        .iter()
        .filter(|c| !desired.iter().any(|d| d.name == c.name))
        .map(|c| c.id.clone())
        .collect();
    plan
}

/// Applies [`plan_command_sync`] for one scope (`guild: None` for global).
///
/// Individual create/edit/delete failures are logged and skipped; only a
/// failure to list the existing commands is returned.
pub async fn sync_application_commands(
    platform: &dyn Platform,
    guild: Option<&GuildId>,
    desired: &[CommandDefinition],
) -> PlatformResult<CommandSyncPlan> {
    let existing = platform.list_application_commands(guild).await?;
    let plan = plan_command_sync(&existing, desired);

    for definition in &plan.create {
        if let Err(e) = platform.create_application_command(guild, definition).await {
            warn!(command = %definition.name, "Failed to create application command: {e}");
        }
    }
    for (id, definition) in &plan.edit {
        if let Err(e) = platform.edit_application_command(guild, id, definition).await {
            warn!(command = %definition.name, "Failed to edit application command: {e}");
        }
    }
    for id in &plan.delete {
        if let Err(e) = platform.delete_application_command(guild, id).await {
            warn!(command_id = %id, "Failed to delete application command: {e}");
        }
    }

    debug!(
        guild = ?guild,
        created = plan.create.len(),
        edited = plan.edit.len(),
        deleted = plan.delete.len(),
        "Application commands reconciled"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::testing::{CommandCall, MockPlatform};

    fn noop(trigger: &str) -> MessageCommandBlueprint {
        MessageCommandBlueprint::new(trigger, |_call| async { Ok(()) })
    }

    fn def(name: &str, description: &str) -> CommandDefinition {
        CommandDefinition {
            name: name.into(),
            description: description.into(),
            options: json!([]),
        }
    }

    fn registered(id: &str, name: &str, description: &str) -> ApplicationCommand {
        ApplicationCommand {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            options: json!([]),
        }
    }

    #[test]
    fn test_parse_trigger_and_args() {
        let command = noop("warn").alias("w");

        let (trigger, args) = command.parse("!", "!WARN  123 being rude").unwrap();
        assert_eq!(trigger, "warn");
        assert_eq!(args, vec!["123", "being", "rude"]);

        let (trigger, args) = command.parse("!", "!w").unwrap();
        assert_eq!(trigger, "w");
        assert!(args.is_empty());

        assert!(command.parse("!", "warn 123").is_none());
        assert!(command.parse("!", "!warning").is_none());
        assert!(command.parse("?", "!warn").is_none());
        assert!(command.parse("!", "!").is_none());
    }

    #[test]
    fn test_parse_rejects_space_after_prefix() {
        let command = noop("ping");
        assert!(command.parse("!", "! ping").is_none());
        assert!(command.parse("!", "!\tping").is_none());
        assert!(command.parse("!", "  !ping").is_some());
    }

    #[test]
    fn test_permission_requires_literal_true() {
        let key = "can_warn".to_string();
        assert!(permitted(&json!({ "can_warn": true }), Some(&key)));
        assert!(!permitted(&json!({ "can_warn": "yes" }), Some(&key)));
        assert!(!permitted(&json!({}), Some(&key)));
        assert!(permitted(&json!({}), None));
    }

    #[test]
    fn test_plan_creates_edits_and_deletes() {
        let existing = vec![
            registered("1", "ping", "Ping"),
            registered("2", "warn", "old text"),
            registered("3", "stale", "Gone"),
        ];
        let desired = vec![def("ping", "Ping"), def("warn", "Warn a member"), def("ban", "Ban")];

        let plan = plan_command_sync(&existing, &desired);
        assert_eq!(plan.create, vec![def("ban", "Ban")]);
        assert_eq!(plan.edit, vec![("2".to_string(), def("warn", "Warn a member"))]);
        assert_eq!(plan.delete, vec!["3".to_string()]);
    }

    #[test]
    fn test_plan_is_empty_when_in_sync() {
        let existing = vec![registered("1", "ping", "Ping")];
        assert!(plan_command_sync(&existing, &[def("ping", "Ping")]).is_empty());
    }

    #[tokio::test]
    async fn test_sync_applies_plan() {
        let platform = MockPlatform::new();
        let guild = GuildId::from("g1");
        platform.set_commands(
            Some(guild.clone()),
            vec![registered("old", "stale", "Gone"), registered("p", "ping", "Ping")],
        );

        let plan = sync_application_commands(&platform, Some(&guild), &[def("ping", "Ping"), def("ban", "Ban")])
            .await
            .unwrap();
        assert_eq!(plan.create.len(), 1);

        let calls = platform.command_calls();
        assert!(calls.contains(&CommandCall::Create {
            guild: Some(guild.clone()),
            name: "ban".into()
        }));
        assert!(calls.contains(&CommandCall::Delete {
            guild: Some(guild.clone()),
            id: "old".into()
        }));

        let mut names: Vec<String> = platform
            .commands(Some(&guild))
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["ban", "ping"]);
    }

    #[tokio::test]
    async fn test_sync_reports_list_failure() {
        let platform = MockPlatform::new();
        platform.fail_command_requests(true);
        assert!(sync_application_commands(&platform, None, &[def("ping", "Ping")]).await.is_err());
    }
}
