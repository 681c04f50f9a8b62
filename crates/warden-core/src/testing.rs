//! In-memory [`Platform`] for tests and demos.
//!
//! Enabled with the `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{
    ApplicationCommand, CommandDefinition, Platform, RawEvent, RawListener, SubscriptionId,
};
use crate::types::GuildId;

/// A recorded application-command REST call.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandCall {
    Create { guild: Option<GuildId>, name: String },
    Edit { guild: Option<GuildId>, id: String, name: String },
    Delete { guild: Option<GuildId>, id: String },
}

#[derive(Default)]
struct MockState {
    listeners: HashMap<String, Vec<(SubscriptionId, RawListener)>>,
    guilds: BTreeSet<GuildId>,
    commands: HashMap<Option<GuildId>, BTreeMap<String, ApplicationCommand>>,
    calls: Vec<CommandCall>,
    fail_commands: bool,
}

/// Platform double: emits events on demand and records command REST calls.
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a platform that is already a member of `guilds`.
    pub fn with_guilds<I, G>(guilds: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GuildId>,
    {
        let platform = Self::new();
        platform
            .state
            .lock()
            .guilds
            .extend(guilds.into_iter().map(Into::into));
        platform
    }

    pub fn add_guild(&self, guild: impl Into<GuildId>) {
        self.state.lock().guilds.insert(guild.into());
    }

    pub fn remove_guild(&self, guild: &GuildId) {
        self.state.lock().guilds.remove(guild);
    }

    /// Delivers an event to every listener subscribed to `name`, in
    /// subscription order, awaiting each.
    pub async fn emit(&self, name: &str, args: Vec<Value>) {
        let listeners: Vec<RawListener> = self
            .state
            .lock()
            .listeners
            .get(name)
            .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        let event = RawEvent::new(name, args);
        for listener in listeners {
            listener(event.clone()).await;
        }
    }

    /// Number of low-level listeners for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .listeners
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Application-command calls recorded so far.
    pub fn command_calls(&self) -> Vec<CommandCall> {
        self.state.lock().calls.clone()
    }

    /// Replaces the registered commands for `guild`.
    pub fn set_commands(&self, guild: Option<GuildId>, commands: Vec<ApplicationCommand>) {
        self.state.lock().commands.insert(
            guild,
            commands.into_iter().map(|c| (c.id.clone(), c)).collect(),
        );
    }

    pub fn commands(&self, guild: Option<&GuildId>) -> Vec<ApplicationCommand> {
        self.state
            .lock()
            .commands
            .get(&guild.cloned())
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes every application-command call fail.
    pub fn fail_command_requests(&self, fail: bool) {
        self.state.lock().fail_commands = fail;
    }

    fn check_commands(&self, action: &str) -> PlatformResult<()> {
        if self.state.lock().fail_commands {
            Err(PlatformError::request(action, "mock failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn subscribe(&self, event: &str, listener: RawListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state
            .lock()
            .listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        for listeners in state.listeners.values_mut() {
            listeners.retain(|(sub, _)| *sub != id);
        }
        state.listeners.retain(|_, ls| !ls.is_empty());
    }

    async fn is_member_of(&self, guild: &GuildId) -> bool {
        self.state.lock().guilds.contains(guild)
    }

    async fn guild_ids(&self) -> Vec<GuildId> {
        self.state.lock().guilds.iter().cloned().collect()
    }

    async fn list_application_commands(
        &self,
        guild: Option<&GuildId>,
    ) -> PlatformResult<Vec<ApplicationCommand>> {
        self.check_commands("list_application_commands")?;
        Ok(self.commands(guild))
    }

    async fn create_application_command(
        &self,
        guild: Option<&GuildId>,
        command: &CommandDefinition,
    ) -> PlatformResult<ApplicationCommand> {
        self.check_commands("create_application_command")?;
        let created = ApplicationCommand {
            id: format!("cmd-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: command.name.clone(),
            description: command.description.clone(),
            options: command.options.clone(),
        };

        let mut state = self.state.lock();
        state.calls.push(CommandCall::Create {
            guild: guild.cloned(),
            name: command.name.clone(),
        });
        state
            .commands
            .entry(guild.cloned())
            .or_default()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn edit_application_command(
        &self,
        guild: Option<&GuildId>,
        id: &str,
        command: &CommandDefinition,
    ) -> PlatformResult<ApplicationCommand> {
        self.check_commands("edit_application_command")?;
        let edited = ApplicationCommand {
            id: id.to_string(),
            name: command.name.clone(),
            description: command.description.clone(),
            options: command.options.clone(),
        };

        let mut state = self.state.lock();
        state.calls.push(CommandCall::Edit {
            guild: guild.cloned(),
            id: id.to_string(),
            name: command.name.clone(),
        });
        state
            .commands
            .entry(guild.cloned())
            .or_default()
            .insert(id.to_string(), edited.clone());
        Ok(edited)
    }

    async fn delete_application_command(
        &self,
        guild: Option<&GuildId>,
        id: &str,
    ) -> PlatformResult<()> {
        self.check_commands("delete_application_command")?;
        let mut state = self.state.lock();
        state.calls.push(CommandCall::Delete {
            guild: guild.cloned(),
            id: id.to_string(),
        });
        if let Some(commands) = state.commands.get_mut(&guild.cloned()) {
            commands.remove(id);
        }
        Ok(())
    }
}
