//! Plugin lifecycle orchestration.
//!
//! [`PluginManager`] drives every context (each guild, plus the single
//! global context) through the same phase machine:
//!
//! ```text
//! UNLOADED ──► LOADING ──► LOADED ──► UNLOADING ──► UNLOADED
//!
//! load:   fetch config ─► resolve plugins + dependencies
//!         ─► beforeLoad (each) ─► beforeStart (each) ─► register events/commands
//!         ─► insert into registry ─► "loaded" ─► afterLoad (each)
//! unload: beforeUnload (each) ─► tear down (each) ─► destroy locks
//!         ─► remove from registry ─► "unloaded" ─► afterUnload (each)
//! ```
//!
//! Concurrency:
//!
//! - Every load and unload of a guild goes through that guild's [`Queue`],
//!   so at most one runs per guild and repeated requests collapse into no-ops.
//! - Availability notifications are admitted through a [`ConcurrentRunner`],
//!   bounding how many guilds load in parallel.
//! - The global context shares one cached in-flight load future between all
//!   callers instead of a queue.
//!
//! A failed load still enters the registry, is immediately unloaded, and the
//! error is returned to the caller. Background loads with no caller report
//! to the error handler set with
//! [`set_error_handler`](PluginManager::set_error_handler), or log at `error`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared, join_all};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower::BoxError;
use tracing::{debug, error, info, trace, warn};
use warden_core::{
    BoxedPlatform, CommandDefinition, ConcurrentRunner, ContextId, DEFAULT_LOCK_GC_INTERVAL,
    DEFAULT_LOCK_TIMEOUT, DEFAULT_QUEUE_TIMEOUT, EventSpecs, GuildId, LockManager, Queue,
    QueueResult,
};

use crate::blueprint::Blueprint;
use crate::commands::{dispatch_interaction, dispatch_message, sync_application_commands};
use crate::config::{ConfigSource, ContextConfig, PluginConfigManager, StaticConfigSource};
use crate::context::{Context, LoadedPlugin};
use crate::cooldown::CooldownManager;
use crate::error::{
    HookKind, PluginError, PluginLoadError, PluginPhase, PluginResult, SharedError, share,
};
use crate::events::PluginEventManager;
use crate::plugin_data::{PluginData, PluginDataParts};
use crate::profiler::Profiler;
use crate::relay::EventRelay;

// =============================================================================
// Options and notifications
// =============================================================================

/// Tunables for the orchestrator and the primitives it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Guild loads admitted in parallel.
    pub concurrent_guild_loads: usize,
    /// Liveness timeout of each queued guild load/unload.
    pub guild_queue_timeout: Duration,
    /// Auto-release timeout of context locks.
    pub lock_timeout: Duration,
    pub lock_gc_interval: Duration,
    /// How long unload waits for in-flight event handlers.
    pub listener_drain_timeout: Duration,
    pub cooldown_cleanup_interval: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            concurrent_guild_loads: 10,
            guild_queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_gc_interval: DEFAULT_LOCK_GC_INTERVAL,
            listener_drain_timeout: Duration::from_secs(10),
            cooldown_cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Host-visible lifecycle notifications.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Loaded(ContextId),
    Unloaded(ContextId),
    /// Every guild present at startup has been through a load attempt.
    LoadingFinished,
    Error(PluginError),
}

/// Picks the plugins to enable for a context, from the registered names.
pub type EnabledPluginsPolicy =
    Arc<dyn Fn(&ContextId, &ContextConfig, &[String]) -> Vec<String> + Send + Sync>;

/// Receives errors from loads nobody is awaiting.
pub type ErrorHandler = Arc<dyn Fn(&PluginError) + Send + Sync>;

type GlobalLoad = Shared<BoxFuture<'static, PluginResult<()>>>;

const NOTIFICATION_CAPACITY: usize = 64;

// =============================================================================
// Builder
// =============================================================================

pub struct PluginManagerBuilder {
    platform: BoxedPlatform,
    config_source: Option<Arc<dyn ConfigSource>>,
    guild_plugins: Vec<Arc<Blueprint>>,
    global_plugins: Vec<Arc<Blueprint>>,
    enabled_policy: Option<EnabledPluginsPolicy>,
    options: ManagerOptions,
    specs: EventSpecs,
}

impl PluginManagerBuilder {
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn guild_plugin(mut self, blueprint: Arc<Blueprint>) -> Self {
        self.guild_plugins.push(blueprint);
        self
    }

    pub fn guild_plugins(mut self, blueprints: impl IntoIterator<Item = Arc<Blueprint>>) -> Self {
        self.guild_plugins.extend(blueprints);
        self
    }

    pub fn global_plugin(mut self, blueprint: Arc<Blueprint>) -> Self {
        self.global_plugins.push(blueprint);
        self
    }

    pub fn global_plugins(mut self, blueprints: impl IntoIterator<Item = Arc<Blueprint>>) -> Self {
        self.global_plugins.extend(blueprints);
        self
    }

    /// Replaces the default policy (config sections not marked `enabled: false`).
    pub fn enabled_plugins<F>(mut self, policy: F) -> Self
    where
        F: Fn(&ContextId, &ContextConfig, &[String]) -> Vec<String> + Send + Sync + 'static,
    {
        self.enabled_policy = Some(Arc::new(policy));
        self
    }

    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn event_specs(mut self, specs: EventSpecs) -> Self {
        self.specs = specs;
        self
    }

    /// Validates plugin names and creates the manager.
    pub fn build(self) -> PluginResult<Arc<PluginManager>> {
        check_names(&self.guild_plugins)?;
        check_names(&self.global_plugins)?;

        let profiler = Arc::new(Profiler::new());
        let relay = EventRelay::new(self.platform.clone(), self.specs, Arc::clone(&profiler));
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Arc::new(PluginManager {
            runner: ConcurrentRunner::new(self.options.concurrent_guild_loads),
            platform: self.platform,
            config_source: self
                .config_source
                .unwrap_or_else(|| Arc::new(StaticConfigSource::new())),
            guild_plugins: self.guild_plugins,
            global_plugins: self.global_plugins,
            enabled_policy: self.enabled_policy,
            options: self.options,
            profiler,
            relay,
            guild_queues: Mutex::new(HashMap::new()),
            guilds: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
            global: RwLock::new(None),
            global_load: Mutex::new(None),
            notifications,
            error_handler: RwLock::new(None),
        }))
    }
}

fn check_names(blueprints: &[Arc<Blueprint>]) -> PluginResult<()> {
    let mut seen = HashSet::new();
    for blueprint in blueprints {
        if blueprint.name().trim().is_empty() {
            return Err(PluginError::MissingName);
        }
        if !seen.insert(blueprint.name()) {
            return Err(PluginError::DuplicatePlugin {
                name: blueprint.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Orders plugins for loading: every transitive dependency first, deepest
/// first, then the enabled plugins not already placed.
///
/// Names are deduplicated; the flag marks plugins that were not enabled
/// themselves and are loaded only as a dependency.
fn resolve_load_order(enabled: &[Arc<Blueprint>]) -> Vec<(Arc<Blueprint>, bool)> {
    fn visit(blueprint: &Arc<Blueprint>, order: &mut Vec<Arc<Blueprint>>) {
        if order.iter().any(|b| b.name() == blueprint.name()) {
            return;
        }
        for dependency in blueprint.dependencies() {
            visit(dependency, order);
        }
        order.push(Arc::clone(blueprint));
    }

    let mut order = Vec::new();
    for dependency in enabled.iter().flat_map(|b| b.dependencies()) {
        visit(dependency, &mut order);
    }
    for blueprint in enabled {
        if !order.iter().any(|b| b.name() == blueprint.name()) {
            order.push(Arc::clone(blueprint));
        }
    }

    let enabled_names: HashSet<&str> = enabled.iter().map(|b| b.name()).collect();
    order
        .into_iter()
        .map(|blueprint| {
            let as_dependency = !enabled_names.contains(blueprint.name());
            (blueprint, as_dependency)
        })
        .collect()
}

/// Clears a guild's in-progress mark however its load ends.
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashSet<GuildId>>,
    guild: &'a GuildId,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.lock().remove(self.guild);
    }
}

// =============================================================================
// PluginManager
// =============================================================================

pub struct PluginManager {
    platform: BoxedPlatform,
    config_source: Arc<dyn ConfigSource>,
    guild_plugins: Vec<Arc<Blueprint>>,
    global_plugins: Vec<Arc<Blueprint>>,
    enabled_policy: Option<EnabledPluginsPolicy>,
    options: ManagerOptions,
    profiler: Arc<Profiler>,
    relay: Arc<EventRelay>,
    runner: ConcurrentRunner,
    guild_queues: Mutex<HashMap<GuildId, Queue>>,
    /// Loaded registry. A guild enters only once its load attempt finished.
    guilds: RwLock<HashMap<GuildId, Arc<Context>>>,
    /// Guilds with a load in progress.
    loading: Mutex<HashSet<GuildId>>,
    global: RwLock<Option<Arc<Context>>>,
    global_load: Mutex<Option<GlobalLoad>>,
    notifications: broadcast::Sender<LifecycleEvent>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl PluginManager {
    pub fn builder(platform: BoxedPlatform) -> PluginManagerBuilder {
        PluginManagerBuilder {
            platform,
            config_source: None,
            guild_plugins: Vec::new(),
            global_plugins: Vec::new(),
            enabled_policy: None,
            options: ManagerOptions::default(),
            specs: EventSpecs::default(),
        }
    }

    // ─── Guild lifecycle ─────────────────────────────────────────────────────

    /// Loads `guild` through its queue.
    ///
    /// A no-op if the guild is already loaded or loading, or if the platform
    /// is not a member of it.
    pub async fn load_guild(self: &Arc<Self>, guild: GuildId) -> PluginResult<()> {
        let this = Arc::clone(self);
        let key = guild.clone();
        self.enqueue(&key, async move { this.do_load_guild(&guild).await })
            .await?
    }

    /// Unloads `guild` through its queue. A no-op if it is not loaded.
    pub async fn unload_guild(self: &Arc<Self>, guild: GuildId) -> PluginResult<()> {
        let this = Arc::clone(self);
        let key = guild.clone();
        self.enqueue(&key, async move { this.do_unload_guild(&guild).await })
            .await?
    }

    /// Loads `guild`, admitted through the concurrent runner.
    pub async fn handle_guild_available(self: &Arc<Self>, guild: GuildId) -> PluginResult<()> {
        self.runner.run(self.load_guild(guild)).await
    }

    pub async fn handle_guild_unavailable(self: &Arc<Self>, guild: GuildId) -> PluginResult<()> {
        self.unload_guild(guild).await
    }

    /// Background variant of [`handle_guild_available`](Self::handle_guild_available);
    /// errors go to [`report_error`](Self::report_error).
    pub fn spawn_guild_load(self: &Arc<Self>, guild: GuildId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.handle_guild_available(guild).await {
                this.report_error(e);
            }
        })
    }

    /// Background variant of [`unload_guild`](Self::unload_guild).
    pub fn spawn_guild_unload(self: &Arc<Self>, guild: GuildId) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.unload_guild(guild).await {
                this.report_error(e);
            }
        })
    }

    /// Loads every guild the platform is a member of, then emits
    /// [`LifecycleEvent::LoadingFinished`]. Failures are reported, not returned.
    pub async fn load_all_guilds(self: &Arc<Self>) {
        let guilds = self.platform.guild_ids().await;
        let started = Instant::now();
        info!(guilds = guilds.len(), "Loading guilds");

        let results = join_all(
            guilds
                .into_iter()
                .map(|guild| self.handle_guild_available(guild)),
        )
        .await;
        for result in results {
            if let Err(e) = result {
                self.report_error(e);
            }
        }

        info!(
            loaded = self.guilds.read().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loading finished"
        );
        self.notify(LifecycleEvent::LoadingFinished);
    }

    async fn do_load_guild(self: &Arc<Self>, guild: &GuildId) -> PluginResult<()> {
        if self.guilds.read().contains_key(guild) {
            debug!(guild_id = %guild, "Guild already loaded, skipping");
            return Ok(());
        }
        if !self.loading.lock().insert(guild.clone()) {
            debug!(guild_id = %guild, "Guild already loading, skipping");
            return Ok(());
        }

        let _loading = LoadingGuard {
            loading: &self.loading,
            guild,
        };
        self.load_guild_inner(guild).await
    }

    async fn load_guild_inner(self: &Arc<Self>, guild: &GuildId) -> PluginResult<()> {
        if !self.platform.is_member_of(guild).await {
            debug!(guild_id = %guild, "Not a member of guild, skipping load");
            return Ok(());
        }

        let id = ContextId::Guild(guild.clone());
        let config = self
            .config_source
            .get_config(&id)
            .await
            .map_err(|e| PluginError::config(id.clone(), e))?;

        let context = Arc::new(Context::new(id.clone(), config, self.lock_manager()));
        let result = self.load_context(&context, &self.guild_plugins).await;
        self.guilds.write().insert(guild.clone(), Arc::clone(&context));

        if let Err(e) = result {
            warn!(guild_id = %guild, "Guild load failed, unloading: {e}");
            if let Err(unload_error) = self.do_unload_guild(guild).await {
                warn!(guild_id = %guild, "Error while unloading failed guild: {unload_error}");
            }
            return Err(e);
        }

        info!(guild_id = %guild, plugins = ?context.plugin_names(), "Guild loaded");
        self.notify(LifecycleEvent::Loaded(id));
        self.run_after_load(&context).await
    }

    async fn do_unload_guild(self: &Arc<Self>, guild: &GuildId) -> PluginResult<()> {
        let Some(context) = self.guilds.read().get(guild).cloned() else {
            debug!(guild_id = %guild, "Guild not loaded, nothing to unload");
            return Ok(());
        };

        let plugins = context.loaded_plugins();
        let before = self.unload_context(&context, &plugins).await;
        self.guilds.write().remove(guild);

        info!(guild_id = %guild, "Guild unloaded");
        self.notify(LifecycleEvent::Unloaded(context.id().clone()));

        let after = self.run_after_unload(&plugins).await;
        self.release_idle_queue(guild);
        match before.or(after) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ─── Global lifecycle ────────────────────────────────────────────────────

    /// Loads the global context. Concurrent callers share one load.
    pub async fn load_global(self: &Arc<Self>) -> PluginResult<()> {
        let load = {
            let mut slot = self.global_load.lock();
            match slot.as_ref() {
                Some(load) => load.clone(),
                None => {
                    let this = Arc::clone(self);
                    let load = async move {
                        let result = this.do_load_global().await;
                        this.global_load.lock().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(load.clone());
                    load
                }
            }
        };
        load.await
    }

    /// Unloads the global context, after any in-flight global load settles.
    pub async fn unload_global(self: &Arc<Self>) -> PluginResult<()> {
        let pending = self.global_load.lock().clone();
        if let Some(pending) = pending {
            let _ = pending.await;
        }
        self.do_unload_global().await
    }

    async fn do_load_global(self: &Arc<Self>) -> PluginResult<()> {
        if self.global.read().is_some() {
            debug!("Global context already loaded, skipping");
            return Ok(());
        }

        let id = ContextId::Global;
        let config = self
            .config_source
            .get_config(&id)
            .await
            .map_err(|e| PluginError::config(id.clone(), e))?;

        let context = Arc::new(Context::new(id.clone(), config, self.lock_manager()));
        let result = self.load_context(&context, &self.global_plugins).await;
        *self.global.write() = Some(Arc::clone(&context));

        if let Err(e) = result {
            warn!("Global load failed, unloading: {e}");
            if let Err(unload_error) = self.do_unload_global().await {
                warn!("Error while unloading failed global context: {unload_error}");
            }
            return Err(e);
        }

        info!(plugins = ?context.plugin_names(), "Global context loaded");
        self.notify(LifecycleEvent::Loaded(id));
        self.run_after_load(&context).await
    }

    async fn do_unload_global(self: &Arc<Self>) -> PluginResult<()> {
        let Some(context) = self.global.read().clone() else {
            return Ok(());
        };

        let plugins = context.loaded_plugins();
        let before = self.unload_context(&context, &plugins).await;
        *self.global.write() = None;

        info!("Global context unloaded");
        self.notify(LifecycleEvent::Unloaded(ContextId::Global));

        let after = self.run_after_unload(&plugins).await;
        match before.or(after) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unloads every guild, then the global context.
    ///
    /// Every unload runs even if some fail; the first error is returned.
    pub async fn unload_all(self: &Arc<Self>) -> PluginResult<()> {
        let guilds = self.loaded_guild_ids();
        let results = join_all(guilds.into_iter().map(|guild| self.unload_guild(guild))).await;
        let global = self.unload_global().await;

        results.into_iter().chain(std::iter::once(global)).collect()
    }

    // ─── Phase machine ───────────────────────────────────────────────────────

    fn enabled_blueprints(
        &self,
        context: &Context,
        available: &[Arc<Blueprint>],
    ) -> PluginResult<Vec<Arc<Blueprint>>> {
        let registered: Vec<String> = available.iter().map(|b| b.name().to_string()).collect();
        let find = |name: &str| available.iter().find(|b| b.name() == name).cloned();

        match &self.enabled_policy {
            Some(policy) => policy(context.id(), context.config(), &registered)
                .iter()
                .map(|name| find(name).ok_or_else(|| PluginError::unknown_plugin(name.as_str())))
                .collect(),
            None => Ok(context
                .config()
                .enabled_plugin_names()
                .iter()
                .filter_map(|name| {
                    let found = find(name);
                    if found.is_none() {
                        warn!(context = %context.id(), plugin = %name, "Config names an unknown plugin, ignoring");
                    }
                    found
                })
                .collect()),
        }
    }

    fn build_plugin_data(
        &self,
        context: &Arc<Context>,
        blueprint: &Blueprint,
    ) -> PluginResult<Arc<PluginData>> {
        let config = PluginConfigManager::init(
            blueprint.default_options(),
            context.config().plugins.get(blueprint.name()),
            Arc::clone(context.levels()),
            blueprint.config_parser(),
            blueprint.extra_predicate().cloned(),
        )?;

        Ok(Arc::new(PluginData::new(PluginDataParts {
            name: blueprint.name().to_string(),
            context: Arc::downgrade(context),
            context_id: context.id().clone(),
            prefix: context.config().prefix().to_string(),
            config,
            locks: Arc::clone(context.locks()),
            cooldowns: CooldownManager::new(self.options.cooldown_cleanup_interval),
            events: PluginEventManager::new(
                Arc::clone(&self.relay),
                context.id().clone(),
                blueprint.name(),
            ),
            platform: self.platform.clone(),
        })))
    }

    async fn run_hook(
        &self,
        blueprint: &Blueprint,
        data: &Arc<PluginData>,
        kind: HookKind,
    ) -> Result<(), BoxError> {
        let Some(hook) = blueprint.hook(kind) else {
            return Ok(());
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(async { hook(Arc::clone(data)).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(format!("{kind} hook panicked").into()));
        self.profiler.add_data_point(
            format!("load-plugin:{kind}:{}", blueprint.name()),
            started.elapsed(),
        );
        result
    }

    async fn load_context(
        &self,
        context: &Arc<Context>,
        available: &[Arc<Blueprint>],
    ) -> PluginResult<()> {
        let enabled = self.enabled_blueprints(context, available)?;
        let order = resolve_load_order(&enabled);
        let load_error = |name: &str, hook: HookKind, source: SharedError| {
            PluginError::from(PluginLoadError::new(name, context.id().clone(), hook, source))
        };

        for (blueprint, as_dependency) in &order {
            let data = self.build_plugin_data(context, blueprint).map_err(|e| {
                load_error(blueprint.name(), HookKind::BeforeLoad, Arc::new(e) as SharedError)
            })?;

            if let Err(e) = self.run_hook(blueprint, &data, HookKind::BeforeLoad).await {
                data.teardown(self.options.listener_drain_timeout).await;
                return Err(load_error(blueprint.name(), HookKind::BeforeLoad, share(e)));
            }

            context.insert_plugin(Arc::new(LoadedPlugin::new(
                Arc::clone(blueprint),
                data,
                *as_dependency,
            )));
        }

        for plugin in context.loaded_plugins() {
            plugin.data().set_phase(PluginPhase::BeforeStart);
            self.run_hook(plugin.blueprint(), plugin.data(), HookKind::BeforeStart)
                .await
                .map_err(|e| load_error(plugin.name(), HookKind::BeforeStart, share(e)))?;
        }

        for plugin in context.loaded_plugins() {
            if !plugin.loaded_as_dependency() {
                self.register_plugin(&plugin);
            }
            plugin.data().set_phase(PluginPhase::Loaded);
            plugin.data().set_loaded(true);
        }

        self.sync_commands(context).await;
        Ok(())
    }

    /// Registers declared events, commands and the built-in dispatch listeners.
    fn register_plugin(&self, plugin: &LoadedPlugin) {
        let data = plugin.data();
        let weak = Arc::downgrade(data);

        for listener in plugin.blueprint().events() {
            let handler = Arc::clone(&listener.handler);
            let weak = weak.clone();
            data.events().on(&listener.event, move |args| {
                let handler = Arc::clone(&handler);
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(data) => handler(data, args).await,
                        None => Ok(()),
                    }
                }
            });
        }

        for command in plugin.blueprint().message_commands() {
            data.commands().add_message_command(command.clone());
        }
        for command in plugin.blueprint().slash_commands() {
            data.commands().add_slash_command(command.clone());
        }

        if data.commands().has_message_commands() {
            let weak = weak.clone();
            data.events().on("messageCreate", move |args| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(data) => dispatch_message(data, args).await,
                        None => Ok(()),
                    }
                }
            });
        }
        if data.commands().has_slash_commands() {
            data.events().on("interactionCreate", move |args| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(data) => dispatch_interaction(data, args).await,
                        None => Ok(()),
                    }
                }
            });
        }
    }

    /// Reconciles the platform's application commands with the context's
    /// slash commands. Contexts without slash commands are left untouched.
    async fn sync_commands(&self, context: &Context) {
        let desired: Vec<CommandDefinition> = context
            .loaded_plugins()
            .iter()
            .filter(|p| !p.loaded_as_dependency())
            .flat_map(|p| p.blueprint().slash_commands().iter().map(|c| c.definition()))
            .collect();
        if desired.is_empty() {
            return;
        }

        if let Err(e) =
            sync_application_commands(self.platform.as_ref(), context.guild_id(), &desired).await
        {
            warn!(context = %context.id(), "Failed to reconcile application commands: {e}");
        }
    }

    async fn run_after_load(&self, context: &Context) -> PluginResult<()> {
        for plugin in context.loaded_plugins() {
            self.run_hook(plugin.blueprint(), plugin.data(), HookKind::AfterLoad)
                .await
                .map_err(|e| PluginError::hook(plugin.name(), HookKind::AfterLoad, e))?;
        }
        Ok(())
    }

    /// Runs `beforeUnload` for every plugin in load order, then tears each
    /// one down and destroys the context's locks. Returns the first hook error.
    async fn unload_context(
        &self,
        context: &Context,
        plugins: &[Arc<LoadedPlugin>],
    ) -> Option<PluginError> {
        let mut first_error = None;

        for plugin in plugins {
            plugin.data().set_phase(PluginPhase::BeforeUnload);
            if let Err(e) = self
                .run_hook(plugin.blueprint(), plugin.data(), HookKind::BeforeUnload)
                .await
            {
                let e = PluginError::hook(plugin.name(), HookKind::BeforeUnload, e);
                warn!(context = %context.id(), plugin = %plugin.name(), "{e}");
                first_error.get_or_insert(e);
            }
        }

        for plugin in plugins {
            plugin.data().set_loaded(false);
            plugin
                .data()
                .teardown(self.options.listener_drain_timeout)
                .await;
            context.remove_plugin(plugin.name());
        }
        context.locks().destroy();

        first_error
    }

    async fn run_after_unload(&self, plugins: &[Arc<LoadedPlugin>]) -> Option<PluginError> {
        let mut first_error = None;
        for plugin in plugins {
            plugin.data().set_phase(PluginPhase::AfterUnload);
            if let Err(e) = self
                .run_hook(plugin.blueprint(), plugin.data(), HookKind::AfterUnload)
                .await
            {
                let e = PluginError::hook(plugin.name(), HookKind::AfterUnload, e);
                warn!(plugin = %plugin.name(), "{e}");
                first_error.get_or_insert(e);
            }
        }
        first_error
    }

    // ─── Errors and notifications ────────────────────────────────────────────

    /// Routes an error from a load nobody awaited.
    pub fn report_error(&self, error: PluginError) {
        self.notify(LifecycleEvent::Error(error.clone()));
        let handler = self.error_handler.read().clone();
        match handler {
            Some(handler) => handler(&error),
            None => error!("Unhandled plugin error: {error}"),
        }
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&PluginError) + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.notifications.subscribe()
    }

    fn notify(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.notifications.send(event);
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn loaded_guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_guild_loaded(&self, guild: &GuildId) -> bool {
        self.guilds.read().contains_key(guild)
    }

    pub fn get_guild_context(&self, guild: &GuildId) -> Option<Arc<Context>> {
        self.guilds.read().get(guild).cloned()
    }

    pub fn get_global_context(&self) -> Option<Arc<Context>> {
        self.global.read().clone()
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    pub fn platform(&self) -> &BoxedPlatform {
        &self.platform
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn runner(&self) -> &ConcurrentRunner {
        &self.runner
    }

    pub fn guild_plugins(&self) -> &[Arc<Blueprint>] {
        &self.guild_plugins
    }

    pub fn global_plugins(&self) -> &[Arc<Blueprint>] {
        &self.global_plugins
    }

    /// Adds `task` to the guild's queue while holding the queue map, so a
    /// queue is never released between lookup and enqueue.
    fn enqueue<F>(
        &self,
        guild: &GuildId,
        task: F,
    ) -> impl Future<Output = QueueResult<F::Output>> + Send
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.guild_queues
            .lock()
            .entry(guild.clone())
            .or_insert_with(|| Queue::with_timeout(self.options.guild_queue_timeout))
            .add(task)
    }

    /// Drops the guild's queue if nothing else is waiting on it.
    fn release_idle_queue(&self, guild: &GuildId) {
        let mut queues = self.guild_queues.lock();
        if queues.get(guild).is_some_and(Queue::is_empty) {
            queues.remove(guild);
            trace!(guild_id = %guild, "Released idle guild queue");
        }
    }

    fn lock_manager(&self) -> LockManager {
        LockManager::with_options(self.options.lock_timeout, self.options.lock_gc_interval)
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("guild_plugins", &self.guild_plugins.len())
            .field("global_plugins", &self.global_plugins.len())
            .field("loaded_guilds", &self.guilds.read().len())
            .field("global_loaded", &self.global.read().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{MessageCommandBlueprint, SlashCommandBlueprint};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::testing::{CommandCall, MockPlatform};
    use warden_core::{Lock, LockState};

    fn context_config(value: Value) -> ContextConfig {
        serde_json::from_value(value).unwrap()
    }

    fn manager(
        platform: &Arc<MockPlatform>,
        config: Value,
        plugins: Vec<Arc<Blueprint>>,
    ) -> Arc<PluginManager> {
        PluginManager::builder(platform.clone())
            .config_source(Arc::new(
                StaticConfigSource::new().fallback(context_config(config)),
            ))
            .guild_plugins(plugins)
            .build()
            .unwrap()
    }

    fn message(guild: &str, content: &str, roles: &[&str]) -> Vec<Value> {
        vec![json!({
            "id": "m1",
            "content": content,
            "author": { "id": "u1" },
            "channel_id": "c1",
            "guild_id": guild,
            "member": { "user": { "id": "u1" }, "roles": roles },
        })]
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>) -> impl Fn(&str) + Clone + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |entry: &str| log.lock().push(entry.to_string())
    }

    #[tokio::test]
    async fn test_duplicate_availability_loads_once() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let after_loads = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&after_loads);
        let plugin = Blueprint::builder("counter")
            .after_load(move |_data| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "counter": {} } }), vec![plugin]);
        let results = join_all((0..20).map(|_| manager.handle_guild_available("g1".into()))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(after_loads.load(Ordering::SeqCst), 1);
        assert!(manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_failed_before_load_cleans_up_siblings() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));

        let first = Blueprint::builder("a")
            .before_load(|data| async move {
                data.events().on("messageCreate", |_args| async { Ok(()) });
                let lock = data.locks().acquire(["shared"], None).await?;
                data.state().insert(lock);
                Ok(())
            })
            .build()
            .unwrap();
        let second = Blueprint::builder("b")
            .before_load(|_data| async { Err("refusing to load".into()) })
            .build()
            .unwrap();

        let held: Arc<Mutex<Option<Lock>>> = Arc::default();
        let holder = Arc::clone(&held);
        let observer = Blueprint::builder("a_observer")
            .dependency(first.clone())
            .before_load(move |data| {
                let holder = Arc::clone(&holder);
                async move {
                    *holder.lock() = data.locks().acquire(["other"], None).await.ok();
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let manager = manager(
            &platform,
            json!({ "plugins": { "a_observer": {}, "b": {} } }),
            vec![first, second, observer],
        );

        let err = manager.load_guild("g1".into()).await.unwrap_err();
        match err {
            PluginError::Load(e) => {
                assert_eq!(e.plugin, "b");
                assert_eq!(e.hook, HookKind::BeforeLoad);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(!manager.is_guild_loaded(&"g1".into()));
        assert_eq!(manager.relay().listener_count("messageCreate"), 0);
        assert_eq!(platform.listener_count("messageCreate"), 0);
        assert_eq!(held.lock().as_ref().unwrap().state(), LockState::Destroyed);
    }

    #[tokio::test]
    async fn test_failed_load_can_be_retried() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let flaky = Blueprint::builder("flaky")
            .before_load(move |_data| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err("first attempt fails".into())
                    } else {
                        Ok(())
                    }
                }
            })
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "flaky": {} } }), vec![flaky]);
        assert!(manager.load_guild("g1".into()).await.is_err());
        assert!(manager.load_guild("g1".into()).await.is_ok());
        assert!(manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_panicking_hook_fails_load_and_allows_retry() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let fragile = Blueprint::builder("fragile")
            .before_load(move |_data| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        panic!("hook blew up");
                    }
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "fragile": {} } }), vec![fragile]);
        match manager.load_guild("g1".into()).await {
            Err(PluginError::Load(e)) => assert_eq!(e.hook, HookKind::BeforeLoad),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!manager.is_guild_loaded(&"g1".into()));

        manager.load_guild("g1".into()).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_unloaded_guild_releases_its_queue() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1", "g2"]));
        let plugin = Blueprint::builder("noop").build().unwrap();
        let manager = manager(&platform, json!({ "plugins": { "noop": {} } }), vec![plugin]);

        manager.load_guild("g1".into()).await.unwrap();
        manager.load_guild("g2".into()).await.unwrap();
        assert_eq!(manager.guild_queues.lock().len(), 2);

        manager.unload_guild("g1".into()).await.unwrap();
        assert!(!manager.guild_queues.lock().contains_key(&GuildId::from("g1")));
        assert!(manager.guild_queues.lock().contains_key(&GuildId::from("g2")));

        manager.load_guild("g1".into()).await.unwrap();
        assert!(manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_dependencies_load_first_without_registering() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let log = Arc::new(Mutex::new(Vec::new()));

        let record = recorder(&log);
        let base = Blueprint::builder("base")
            .before_load({
                let record = record.clone();
                move |_data| {
                    record("base:beforeLoad");
                    async { Ok(()) }
                }
            })
            .event("messageCreate", |_data, _args| async { Ok(()) })
            .public(|_data| String::from("base api"))
            .build()
            .unwrap();

        let top = Blueprint::builder("top")
            .dependency(base)
            .before_load({
                let record = record.clone();
                move |data| {
                    record("top:beforeLoad");
                    let access = data.has_plugin("base");
                    async move {
                        assert!(matches!(
                            access,
                            Err(PluginError::CapabilityUnavailable { phase: PluginPhase::BeforeLoad, .. })
                        ));
                        Ok(())
                    }
                }
            })
            .before_start({
                let record = record.clone();
                move |data| {
                    record("top:beforeStart");
                    let api = data.get_plugin::<String>("base");
                    let missing = data.get_plugin::<String>("nope");
                    let wrong_type = data.get_plugin::<u32>("base");
                    async move {
                        assert_eq!(api?.as_str(), "base api");
                        assert!(matches!(missing, Err(PluginError::PluginNotLoaded { .. })));
                        assert!(matches!(wrong_type, Err(PluginError::InterfaceType { .. })));
                        Ok(())
                    }
                }
            })
            .event("messageCreate", |_data, _args| async { Ok(()) })
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "top": {} } }), vec![top]);
        manager.load_guild("g1".into()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["base:beforeLoad", "top:beforeLoad", "top:beforeStart"]
        );

        let context = manager.get_guild_context(&"g1".into()).unwrap();
        assert_eq!(context.plugin_names(), vec!["base", "top"]);
        assert!(context.get_plugin("base").unwrap().loaded_as_dependency());
        assert!(context.get_plugin("top").unwrap().data().is_loaded());
        // Only the enabling plugin registers its declared events.
        assert_eq!(manager.relay().listener_count("messageCreate"), 1);
    }

    #[tokio::test]
    async fn test_unload_runs_hooks_in_load_order_and_blocks_access_after() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let log = Arc::new(Mutex::new(Vec::new()));

        let plugin = |name: &'static str| {
            let before = recorder(&log);
            let after = recorder(&log);
            Blueprint::builder(name)
                .before_unload(move |data| {
                    before(&format!("{name}:beforeUnload"));
                    let access = data.has_plugin("x");
                    async move {
                        access?;
                        Ok(())
                    }
                })
                .after_unload(move |data| {
                    after(&format!("{name}:afterUnload"));
                    let access = data.has_plugin("x");
                    async move {
                        assert!(matches!(
                            access,
                            Err(PluginError::CapabilityUnavailable { .. })
                        ));
                        Ok(())
                    }
                })
                .build()
                .unwrap()
        };

        let manager = manager(
            &platform,
            json!({ "plugins": { "x": {}, "y": {} } }),
            vec![plugin("x"), plugin("y")],
        );
        manager.load_guild("g1".into()).await.unwrap();

        let mut notifications = manager.subscribe();
        manager.unload_guild("g1".into()).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["x:beforeUnload", "y:beforeUnload", "x:afterUnload", "y:afterUnload"]
        );
        assert!(!manager.is_guild_loaded(&"g1".into()));
        assert!(matches!(
            notifications.recv().await.unwrap(),
            LifecycleEvent::Unloaded(ContextId::Guild(_))
        ));

        // Unloading again is a no-op.
        manager.unload_guild("g1".into()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_member_guild_is_skipped() {
        let platform = Arc::new(MockPlatform::new());
        let plugin = Blueprint::builder("p").build().unwrap();
        let manager = manager(&platform, json!({ "plugins": { "p": {} } }), vec![plugin]);

        manager.load_guild("ghost".into()).await.unwrap();
        assert!(manager.loaded_guild_ids().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plugin_from_custom_policy() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let manager = PluginManager::builder(platform.clone())
            .guild_plugin(Blueprint::builder("real").build().unwrap())
            .enabled_plugins(|_id, _config, _registered| vec!["imaginary".to_string()])
            .build()
            .unwrap();

        let err = manager.load_guild("g1".into()).await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin { name } if name == "imaginary"));
        assert!(!manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let result = PluginManager::builder(platform)
            .guild_plugin(Blueprint::builder("same").build().unwrap())
            .guild_plugin(Blueprint::builder("same").build().unwrap())
            .build();
        assert!(matches!(result, Err(PluginError::DuplicatePlugin { .. })));
    }

    #[tokio::test]
    async fn test_global_load_is_shared_between_callers() {
        let platform = Arc::new(MockPlatform::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&loads);
        let plugin = Blueprint::builder("global")
            .before_load(move |_data| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build()
            .unwrap();

        let manager = PluginManager::builder(platform.clone())
            .config_source(Arc::new(StaticConfigSource::new().global(context_config(
                json!({ "plugins": { "global": {} } }),
            ))))
            .global_plugin(plugin)
            .build()
            .unwrap();

        let (a, b) = tokio::join!(manager.load_global(), manager.load_global());
        assert!(a.is_ok() && b.is_ok());
        manager.load_global().await.unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(manager.get_global_context().is_some());

        manager.unload_global().await.unwrap();
        assert!(manager.get_global_context().is_none());
    }

    #[tokio::test]
    async fn test_failed_global_load_is_cleared_and_retried() {
        let platform = Arc::new(MockPlatform::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let plugin = Blueprint::builder("global")
            .before_start(move |_data| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err("not ready".into())
                    } else {
                        Ok(())
                    }
                }
            })
            .build()
            .unwrap();

        let manager = PluginManager::builder(platform.clone())
            .config_source(Arc::new(StaticConfigSource::new().global(context_config(
                json!({ "plugins": { "global": {} } }),
            ))))
            .global_plugin(plugin)
            .build()
            .unwrap();

        match manager.load_global().await {
            Err(PluginError::Load(e)) => assert_eq!(e.hook, HookKind::BeforeStart),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(manager.get_global_context().is_none());
        assert!(manager.global_load.lock().is_none());

        manager.load_global().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(manager.get_global_context().is_some());
    }

    #[tokio::test]
    async fn test_background_errors_reach_handler() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let broken = Blueprint::builder("broken")
            .before_start(|_data| async { Err("no".into()) })
            .build()
            .unwrap();
        let manager = manager(&platform, json!({ "plugins": { "broken": {} } }), vec![broken]);

        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        manager.set_error_handler(move |e| sink.lock().push(e.to_string()));

        manager.spawn_guild_load("g1".into()).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("beforeStart"));
    }

    #[tokio::test]
    async fn test_message_command_respects_permission_override() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let command = MessageCommandBlueprint::new("ping", move |call| {
            let counter = Arc::clone(&counter);
            async move {
                assert_eq!(call.args, vec!["now"]);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .permission("can_ping");

        let plugin = Blueprint::builder("pinger")
            .default_options(
                serde_json::from_value(json!({
                    "config": { "can_ping": false },
                    "overrides": [{ "level": ">=50", "config": { "can_ping": true } }]
                }))
                .unwrap(),
            )
            .message_command(command)
            .build()
            .unwrap();

        let manager = manager(
            &platform,
            json!({ "prefix": "?", "levels": { "mod": 50 }, "plugins": { "pinger": {} } }),
            vec![plugin],
        );
        manager.load_guild("g1".into()).await.unwrap();

        platform.emit("messageCreate", message("g1", "?ping now", &[])).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        platform.emit("messageCreate", message("g1", "!ping now", &["mod"])).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        platform.emit("messageCreate", message("g1", "?ping now", &["mod"])).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        platform.emit("messageCreate", message("g2", "?ping now", &["mod"])).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_command_cooldown() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let plugin = Blueprint::builder("slow")
            .message_command(
                MessageCommandBlueprint::new("slow", move |_call| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .cooldown(Duration::from_secs(60)),
            )
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "slow": {} } }), vec![plugin]);
        manager.load_guild("g1".into()).await.unwrap();

        platform.emit("messageCreate", message("g1", "!slow", &[])).await;
        platform.emit("messageCreate", message("g1", "!slow", &[])).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slash_commands_reconciled_after_load() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let plugin = Blueprint::builder("slash")
            .slash_command(SlashCommandBlueprint::new("warn", "Warn a member", |_call| async {
                Ok(())
            }))
            .build()
            .unwrap();

        let manager = manager(&platform, json!({ "plugins": { "slash": {} } }), vec![plugin]);
        manager.load_guild("g1".into()).await.unwrap();

        assert_eq!(
            platform.command_calls(),
            vec![CommandCall::Create {
                guild: Some("g1".into()),
                name: "warn".into()
            }]
        );
        assert_eq!(manager.relay().listener_count("interactionCreate"), 1);
    }

    #[tokio::test]
    async fn test_config_validation_aborts_load() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let strict = Blueprint::builder("strict")
            .config_parser(|value| {
                if value.get("limit").is_some_and(Value::is_number) {
                    Ok(value)
                } else {
                    Err(crate::error::ConfigValidationError::new("limit must be a number"))
                }
            })
            .build()
            .unwrap();

        let manager = manager(
            &platform,
            json!({ "plugins": { "strict": { "config": { "limit": "lots" } } } }),
            vec![strict],
        );

        let err = manager.load_guild("g1".into()).await.unwrap_err();
        assert!(err.to_string().contains("limit must be a number"));
        assert!(!manager.is_guild_loaded(&"g1".into()));
    }

    #[tokio::test]
    async fn test_load_all_guilds_emits_loading_finished() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1", "g2", "g3"]));
        let manager = manager(
            &platform,
            json!({ "plugins": { "p": {} } }),
            vec![Blueprint::builder("p").build().unwrap()],
        );
        let mut notifications = manager.subscribe();

        manager.load_all_guilds().await;
        assert_eq!(manager.loaded_guild_ids().len(), 3);

        let mut finished = false;
        while let Ok(event) = notifications.try_recv() {
            finished |= matches!(event, LifecycleEvent::LoadingFinished);
        }
        assert!(finished);

        manager.unload_all().await.unwrap();
        assert!(manager.loaded_guild_ids().is_empty());
    }

    #[test]
    fn test_resolve_load_order_dedupes_shared_dependencies() {
        let leaf = Blueprint::builder("leaf").build().unwrap();
        let mid = Blueprint::builder("mid").dependency(leaf.clone()).build().unwrap();
        let left = Blueprint::builder("left")
            .dependency(mid.clone())
            .dependency(leaf.clone())
            .build()
            .unwrap();
        let right = Blueprint::builder("right").dependency(mid.clone()).build().unwrap();

        let order = resolve_load_order(&[left, right, mid]);
        let names: Vec<(&str, bool)> = order.iter().map(|(b, dep)| (b.name(), *dep)).collect();
        assert_eq!(
            names,
            vec![("leaf", true), ("mid", false), ("left", false), ("right", false)]
        );
    }

    #[test]
    fn test_dependencies_precede_every_enabled_plugin() {
        let c = Blueprint::builder("c").build().unwrap();
        let a = Blueprint::builder("a").build().unwrap();
        let b = Blueprint::builder("b").dependency(c).build().unwrap();

        let order = resolve_load_order(&[a, b]);
        let names: Vec<(&str, bool)> = order.iter().map(|(b, dep)| (b.name(), *dep)).collect();
        assert_eq!(names, vec![("c", true), ("a", false), ("b", false)]);
    }
}
