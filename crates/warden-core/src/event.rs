//! Named event arguments and per-event adapters.
//!
//! Platform clients emit events with positional JSON arguments. Before an
//! event reaches plugin listeners it is converted into an [`EventArgs`]
//! record with named fields, and its guild is resolved so the relay can route
//! it to the right guild bucket. Both steps are driven by an [`EventSpec`]
//! looked up by event name in [`EventSpecs`].
//!
//! ```text
//! RawEvent { "messageCreate", [ {..} ] }
//!      │  EventSpec::convert
//!      ▼
//! EventArgs { message: {..} }  ──guild──►  Some("1234")
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::platform::RawEvent;
use crate::types::GuildId;

// =============================================================================
// EventArgs
// =============================================================================

/// Named arguments of a converted event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventArgs {
    event: String,
    args: BTreeMap<String, Value>,
}

impl EventArgs {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            args: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }

    /// Name of the event these arguments belong to.
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Deserializes a named argument into `T`.
    ///
    /// Returns `None` when the argument is missing or has a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

// =============================================================================
// EventSpec
// =============================================================================

/// Resolves the guild an event belongs to.
pub type GuildExtractor = Arc<dyn Fn(&EventArgs) -> Option<GuildId> + Send + Sync>;

/// Adapter for one event name: positional argument names plus a guild extractor.
#[derive(Clone)]
pub struct EventSpec {
    arg_names: Vec<String>,
    guild: Option<GuildExtractor>,
}

impl EventSpec {
    /// A spec whose events are never routed to a guild.
    pub fn new<I, S>(arg_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            arg_names: arg_names.into_iter().map(Into::into).collect(),
            guild: None,
        }
    }

    /// Sets the guild extractor.
    pub fn with_guild<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&EventArgs) -> Option<GuildId> + Send + Sync + 'static,
    {
        self.guild = Some(Arc::new(extractor));
        self
    }

    /// Reads the guild from a field of a named argument, e.g. `message.guild_id`.
    pub fn with_guild_field(self, arg: &'static str, field: &'static str) -> Self {
        self.with_guild(move |args| guild_field(args, arg, field))
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    /// Names positional arguments. Arguments beyond the declared names are dropped;
    /// missing ones are absent from the record.
    pub fn convert(&self, event: &RawEvent) -> EventArgs {
        let mut args = EventArgs::new(event.name.clone());
        for (name, value) in self.arg_names.iter().zip(event.args.iter()) {
            args.insert(name.clone(), value.clone());
        }
        args
    }

    pub fn guild(&self, args: &EventArgs) -> Option<GuildId> {
        self.guild.as_ref().and_then(|extract| extract(args))
    }
}

impl fmt::Debug for EventSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSpec")
            .field("arg_names", &self.arg_names)
            .field("has_guild", &self.guild.is_some())
            .finish()
    }
}

fn guild_field(args: &EventArgs, arg: &str, field: &str) -> Option<GuildId> {
    match args.get(arg)?.get(field)? {
        Value::String(id) => Some(GuildId::new(id.clone())),
        Value::Number(id) => Some(GuildId::new(id.to_string())),
        _ => None,
    }
}

// =============================================================================
// EventSpecs
// =============================================================================

/// Table of [`EventSpec`]s keyed by event name.
#[derive(Debug, Clone)]
pub struct EventSpecs {
    specs: HashMap<String, EventSpec>,
}

impl EventSpecs {
    /// An empty table: every event uses positional `argN` names and has no guild.
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Registers or replaces the spec for `event`.
    pub fn register(&mut self, event: impl Into<String>, spec: EventSpec) {
        self.specs.insert(event.into(), spec);
    }

    pub fn get(&self, event: &str) -> Option<&EventSpec> {
        self.specs.get(event)
    }

    /// Converts a raw event into named arguments and resolves its guild.
    pub fn convert(&self, event: &RawEvent) -> (EventArgs, Option<GuildId>) {
        match self.specs.get(&event.name) {
            Some(spec) => {
                let args = spec.convert(event);
                let guild = spec.guild(&args);
                (args, guild)
            }
            None => {
                let mut args = EventArgs::new(event.name.clone());
                for (i, value) in event.args.iter().enumerate() {
                    args.insert(format!("arg{i}"), value.clone());
                }
                (args, None)
            }
        }
    }
}

impl Default for EventSpecs {
    fn default() -> Self {
        let mut specs = Self::empty();
        let mut add = |event: &str, spec: EventSpec| specs.register(event, spec);

        add("ready", EventSpec::new(["client"]));

        add(
            "messageCreate",
            EventSpec::new(["message"]).with_guild_field("message", "guild_id"),
        );
        add(
            "messageUpdate",
            EventSpec::new(["oldMessage", "newMessage"]).with_guild_field("newMessage", "guild_id"),
        );
        add(
            "messageDelete",
            EventSpec::new(["message"]).with_guild_field("message", "guild_id"),
        );
        add(
            "messageReactionAdd",
            EventSpec::new(["reaction", "user"]).with_guild_field("reaction", "guild_id"),
        );
        add(
            "messageReactionRemove",
            EventSpec::new(["reaction", "user"]).with_guild_field("reaction", "guild_id"),
        );

        add(
            "guildMemberAdd",
            EventSpec::new(["member"]).with_guild_field("member", "guild_id"),
        );
        add(
            "guildMemberRemove",
            EventSpec::new(["member"]).with_guild_field("member", "guild_id"),
        );
        add(
            "guildMemberUpdate",
            EventSpec::new(["oldMember", "newMember"]).with_guild_field("newMember", "guild_id"),
        );

        add(
            "channelCreate",
            EventSpec::new(["channel"]).with_guild_field("channel", "guild_id"),
        );
        add(
            "channelUpdate",
            EventSpec::new(["oldChannel", "newChannel"]).with_guild_field("newChannel", "guild_id"),
        );
        add(
            "channelDelete",
            EventSpec::new(["channel"]).with_guild_field("channel", "guild_id"),
        );
        add(
            "threadCreate",
            EventSpec::new(["thread"]).with_guild_field("thread", "guild_id"),
        );
        add(
            "threadDelete",
            EventSpec::new(["thread"]).with_guild_field("thread", "guild_id"),
        );
        add(
            "roleCreate",
            EventSpec::new(["role"]).with_guild_field("role", "guild_id"),
        );
        add(
            "roleDelete",
            EventSpec::new(["role"]).with_guild_field("role", "guild_id"),
        );

        add(
            "interactionCreate",
            EventSpec::new(["interaction"]).with_guild_field("interaction", "guild_id"),
        );

        add(
            "guildBanAdd",
            EventSpec::new(["ban"]).with_guild_field("ban", "guild_id"),
        );
        add(
            "guildBanRemove",
            EventSpec::new(["ban"]).with_guild_field("ban", "guild_id"),
        );

        add(
            "guildCreate",
            EventSpec::new(["guild"]).with_guild_field("guild", "id"),
        );
        add(
            "guildUpdate",
            EventSpec::new(["oldGuild", "newGuild"]).with_guild_field("newGuild", "id"),
        );
        add(
            "guildDelete",
            EventSpec::new(["guild"]).with_guild_field("guild", "id"),
        );
        add(
            "guildAvailable",
            EventSpec::new(["guild"]).with_guild_field("guild", "id"),
        );
        add(
            "guildUnavailable",
            EventSpec::new(["guild"]).with_guild_field("guild", "id"),
        );

        add(
            "typingStart",
            EventSpec::new(["typing"]).with_guild_field("typing", "guild_id"),
        );
        add(
            "voiceStateUpdate",
            EventSpec::new(["oldState", "newState"]).with_guild_field("newState", "guild_id"),
        );

        specs
    }
}
