//! Static plugin declarations.
//!
//! A [`Blueprint`] describes a plugin once; the manager instantiates it per
//! context by building a fresh [`PluginData`] and running its hooks.
//!
//! # Example
//!
//! ```rust,ignore
//! let greeter = Blueprint::builder("greeter")
//!     .default_options(PluginOptions::with_config(json!({ "greeting": "hi" })))
//!     .before_load(|data| async move {
//!         data.state().insert(Greeted::default());
//!         Ok(())
//!     })
//!     .event("guildMemberAdd", |data, args| async move {
//!         let greeting = data.config().get()["greeting"].clone();
//!         // ...
//!         Ok(())
//!     })
//!     .build()?;
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tower::BoxError;
use warden_core::EventArgs;

use crate::commands::{MessageCommandBlueprint, SlashCommandBlueprint};
use crate::config::{ConfigParser, PluginOptions};
use crate::error::{ConfigValidationError, HookKind, PluginError, PluginResult};
use crate::overrides::{ExtraPredicate, MatchParams};
use crate::plugin_data::PluginData;

/// An async lifecycle hook.
pub type HookFn =
    Arc<dyn Fn(Arc<PluginData>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A declared event handler.
pub type EventHandlerFn = Arc<
    dyn Fn(Arc<PluginData>, Arc<EventArgs>) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

/// Builds the interface other plugins get from `get_plugin`.
pub type PublicFactory = Arc<dyn Fn(Arc<PluginData>) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// An event handler declared on a blueprint.
#[derive(Clone)]
pub struct EventListenerBlueprint {
    pub event: String,
    pub handler: EventHandlerFn,
}

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    before_load: Option<HookFn>,
    before_start: Option<HookFn>,
    after_load: Option<HookFn>,
    before_unload: Option<HookFn>,
    after_unload: Option<HookFn>,
}

/// Immutable plugin declaration.
pub struct Blueprint {
    name: String,
    dependencies: Vec<Arc<Blueprint>>,
    default_options: PluginOptions,
    hooks: Hooks,
    events: Vec<EventListenerBlueprint>,
    message_commands: Vec<MessageCommandBlueprint>,
    slash_commands: Vec<SlashCommandBlueprint>,
    public: Option<PublicFactory>,
    config_parser: Option<ConfigParser>,
    extra_predicate: Option<ExtraPredicate>,
}

impl Blueprint {
    pub fn builder(name: impl Into<String>) -> BlueprintBuilder {
        BlueprintBuilder {
            name: name.into(),
            dependencies: Vec::new(),
            default_options: PluginOptions::default(),
            hooks: Hooks::default(),
            events: Vec::new(),
            message_commands: Vec::new(),
            slash_commands: Vec::new(),
            public: None,
            config_parser: None,
            extra_predicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blueprints that must be loaded before this one.
    pub fn dependencies(&self) -> &[Arc<Blueprint>] {
        &self.dependencies
    }

    pub fn default_options(&self) -> &PluginOptions {
        &self.default_options
    }

    pub fn hook(&self, kind: HookKind) -> Option<&HookFn> {
        match kind {
            HookKind::BeforeLoad => self.hooks.before_load.as_ref(),
            HookKind::BeforeStart => self.hooks.before_start.as_ref(),
            HookKind::AfterLoad => self.hooks.after_load.as_ref(),
            HookKind::BeforeUnload => self.hooks.before_unload.as_ref(),
            HookKind::AfterUnload => self.hooks.after_unload.as_ref(),
        }
    }

    pub fn events(&self) -> &[EventListenerBlueprint] {
        &self.events
    }

    pub fn message_commands(&self) -> &[MessageCommandBlueprint] {
        &self.message_commands
    }

    pub fn slash_commands(&self) -> &[SlashCommandBlueprint] {
        &self.slash_commands
    }

    pub fn public(&self) -> Option<&PublicFactory> {
        self.public.as_ref()
    }

    pub fn config_parser(&self) -> Option<&ConfigParser> {
        self.config_parser.as_ref()
    }

    pub fn extra_predicate(&self) -> Option<&ExtraPredicate> {
        self.extra_predicate.as_ref()
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("name", &self.name)
            .field(
                "dependencies",
                &self.dependencies.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .field("events", &self.events.len())
            .field("message_commands", &self.message_commands.len())
            .field("slash_commands", &self.slash_commands.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct BlueprintBuilder {
    name: String,
    dependencies: Vec<Arc<Blueprint>>,
    default_options: PluginOptions,
    hooks: Hooks,
    events: Vec<EventListenerBlueprint>,
    message_commands: Vec<MessageCommandBlueprint>,
    slash_commands: Vec<SlashCommandBlueprint>,
    public: Option<PublicFactory>,
    config_parser: Option<ConfigParser>,
    extra_predicate: Option<ExtraPredicate>,
}

fn hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |data| f(data).boxed())
}

impl BlueprintBuilder {
    pub fn dependency(mut self, blueprint: Arc<Blueprint>) -> Self {
        self.dependencies.push(blueprint);
        self
    }

    pub fn default_options(mut self, options: PluginOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn before_load<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.before_load = Some(hook(f));
        self
    }

    pub fn before_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.before_start = Some(hook(f));
        self
    }

    pub fn after_load<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.after_load = Some(hook(f));
        self
    }

    pub fn before_unload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.before_unload = Some(hook(f));
        self
    }

    pub fn after_unload<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<PluginData>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.after_unload = Some(hook(f));
        self
    }

    /// Declares a handler for a platform event.
    pub fn event<F, Fut>(mut self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<PluginData>, Arc<EventArgs>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.events.push(EventListenerBlueprint {
            event: event.into(),
            handler: Arc::new(move |data, args| f(data, args).boxed()),
        });
        self
    }

    pub fn message_command(mut self, command: MessageCommandBlueprint) -> Self {
        self.message_commands.push(command);
        self
    }

    pub fn slash_command(mut self, command: SlashCommandBlueprint) -> Self {
        self.slash_commands.push(command);
        self
    }

    /// Exposes a typed interface to other plugins via `get_plugin::<T>`.
    pub fn public<T, F>(mut self, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<PluginData>) -> T + Send + Sync + 'static,
    {
        self.public = Some(Arc::new(move |data| Arc::new(f(data)) as Arc<dyn Any + Send + Sync>));
        self
    }

    pub fn config_parser<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ConfigValidationError> + Send + Sync + 'static,
    {
        self.config_parser = Some(Arc::new(f));
        self
    }

    /// Evaluates `extra` criteria in this plugin's overrides.
    pub fn extra_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &MatchParams) -> bool + Send + Sync + 'static,
    {
        self.extra_predicate = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> PluginResult<Arc<Blueprint>> {
        if self.name.trim().is_empty() {
            return Err(PluginError::MissingName);
        }

        Ok(Arc::new(Blueprint {
            name: self.name,
            dependencies: self.dependencies,
            default_options: self.default_options,
            hooks: self.hooks,
            events: self.events,
            message_commands: self.message_commands,
            slash_commands: self.slash_commands,
            public: self.public,
            config_parser: self.config_parser,
            extra_predicate: self.extra_predicate,
        }))
    }
}
