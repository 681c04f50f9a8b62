//! Host runtime: wires platform guild events to the plugin manager.
//!
//! ```text
//!   ready ────────────────► load global context, then every member guild
//!   guildAvailable/Create ─► PluginManager::handle_guild_available
//!   guildUnavailable/Delete► PluginManager::handle_guild_unavailable
//!   shutdown signal ───────► PluginManager::unload_all
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use warden_runtime::WardenRuntime;
//!
//! let runtime = WardenRuntime::builder(platform)
//!     .config_file("config/warden.toml")
//!     .guild_plugin(welcome::blueprint()?)
//!     .build()?;
//!
//! // Runs until Ctrl+C or SIGTERM
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, info, warn};
use warden_core::{BoxedPlatform, EventSpecs, GuildId, RawEvent, RawListener, SubscriptionId};
use warden_framework::{Blueprint, ConfigSource, PluginManager};

use crate::config::{ConfigLoader, WardenConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

const READY_EVENT: &str = "ready";
const GUILD_AVAILABLE_EVENTS: [&str; 2] = ["guildAvailable", "guildCreate"];
const GUILD_UNAVAILABLE_EVENTS: [&str; 2] = ["guildUnavailable", "guildDelete"];

/// A running Warden host.
///
/// Owns the [`PluginManager`] and the platform subscriptions that drive it.
pub struct WardenRuntime {
    config: WardenConfig,
    manager: Arc<PluginManager>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    running: AtomicBool,
}

impl WardenRuntime {
    /// Creates a runtime builder for `platform`.
    ///
    /// Configuration is searched for in the current directory unless a file,
    /// search path or ready-made [`WardenConfig`] is given.
    pub fn builder(platform: BoxedPlatform) -> RuntimeBuilder {
        RuntimeBuilder::new(platform)
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribes to the platform's ready and guild availability events.
    ///
    /// Calling this on a running runtime does nothing.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return;
        }

        info!(
            guild_plugins = self.manager.guild_plugins().len(),
            global_plugins = self.manager.global_plugins().len(),
            "Starting Warden runtime"
        );

        let platform = self.manager.platform();
        let mut ids = Vec::with_capacity(1 + GUILD_AVAILABLE_EVENTS.len() * 2);

        ids.push(platform.subscribe(READY_EVENT, self.ready_listener()));
        for event in GUILD_AVAILABLE_EVENTS {
            let listener = self.guild_listener(event, GuildChange::Available);
            ids.push(platform.subscribe(event, listener));
        }
        for event in GUILD_UNAVAILABLE_EVENTS {
            let listener = self.guild_listener(event, GuildChange::Unavailable);
            ids.push(platform.subscribe(event, listener));
        }

        *self.subscriptions.lock() = ids;
        info!("Runtime started");
    }

    /// Loads the global context, then every guild the platform is a member of.
    ///
    /// Failures are routed to [`PluginManager::report_error`].
    pub async fn load_all(&self) {
        load_everything(&self.manager).await;
    }

    /// Drops the platform subscriptions and unloads every context.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Runtime is not running");
            return Ok(());
        }

        info!("Stopping Warden runtime");

        let ids = std::mem::take(&mut *self.subscriptions.lock());
        for id in ids {
            self.manager.platform().unsubscribe(id);
        }

        self.manager.unload_all().await?;
        info!("Runtime stopped");
        Ok(())
    }

    /// Runs until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start();
        info!("Warden runtime is now running. Press Ctrl+C to stop.");

        wait_for_shutdown().await;

        self.stop().await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start();
        shutdown.await;
        self.stop().await
    }

    // =========================================================================
    // Platform listeners
    // =========================================================================

    fn ready_listener(&self) -> RawListener {
        let manager = Arc::downgrade(&self.manager);
        Arc::new(move |_event: RawEvent| {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                info!("Platform ready");
                load_everything(&manager).await;
            }
            .boxed()
        })
    }

    fn guild_listener(&self, event: &'static str, change: GuildChange) -> RawListener {
        let manager = Arc::downgrade(&self.manager);
        Arc::new(move |raw: RawEvent| {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                let Some(guild) = event_guild(&manager, &raw) else {
                    debug!(event, "Guild event without a guild id, ignoring");
                    return;
                };
                change.apply(&manager, guild).await;
            }
            .boxed()
        })
    }
}

impl std::fmt::Debug for WardenRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WardenRuntime")
            .field("running", &self.is_running())
            .field("loaded_guilds", &self.manager.loaded_guild_ids().len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum GuildChange {
    Available,
    Unavailable,
}

impl GuildChange {
    async fn apply(self, manager: &Arc<PluginManager>, guild: GuildId) {
        let result = match self {
            Self::Available => manager.handle_guild_available(guild).await,
            Self::Unavailable => manager.handle_guild_unavailable(guild).await,
        };
        if let Err(e) = result {
            manager.report_error(e);
        }
    }
}

fn event_guild(manager: &PluginManager, raw: &RawEvent) -> Option<GuildId> {
    manager.relay().specs().convert(raw).1
}

async fn load_everything(manager: &Arc<PluginManager>) {
    if let Err(e) = manager.load_global().await {
        manager.report_error(e);
    }
    manager.load_all_guilds().await;
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => warn!("Failed to listen for Ctrl+C, shutting down: {e}"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`WardenRuntime`].
///
/// ```rust,ignore
/// let runtime = WardenRuntime::builder(platform)
///     .profile("production")
///     .guild_plugins([moderation, welcome])
///     .global_plugin(status)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    platform: BoxedPlatform,
    config_loader: ConfigLoader,
    config: Option<WardenConfig>,
    config_source: Option<Arc<dyn ConfigSource>>,
    guild_plugins: Vec<Arc<Blueprint>>,
    global_plugins: Vec<Arc<Blueprint>>,
    event_specs: Option<EventSpecs>,
}

impl RuntimeBuilder {
    fn new(platform: BoxedPlatform) -> Self {
        Self {
            platform,
            config_loader: ConfigLoader::new(),
            config: None,
            config_source: None,
            guild_plugins: Vec::new(),
            global_plugins: Vec::new(),
            event_specs: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Ignores `WARDEN_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as-is instead of loading one. It is still validated.
    pub fn config(mut self, config: WardenConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Serves context configuration from `source` instead of the
    /// `contexts` section.
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

    pub fn event_specs(mut self, specs: EventSpecs) -> Self {
        self.event_specs = Some(specs);
        self
    }

    /// Loads configuration, installs logging and creates the plugin manager.
    pub fn build(self) -> RuntimeResult<Arc<WardenRuntime>> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        logging::init_from_config(&config.logging);

        let source: Arc<dyn ConfigSource> = match self.config_source {
            Some(source) => source,
            None => Arc::new(config.contexts.to_source()?),
        };

        let mut builder = PluginManager::builder(self.platform)
            .config_source(source)
            .guild_plugins(self.guild_plugins)
            .global_plugins(self.global_plugins)
            .options(config.host.manager_options());
        if let Some(specs) = self.event_specs {
            builder = builder.event_specs(specs);
        }
        let manager = builder.build()?;

        info!(
            log_level = %config.logging.level,
            concurrent_guild_loads = config.host.concurrent_guild_loads,
            configured_guilds = config.contexts.guilds.len(),
            "Runtime initialized from configuration"
        );

        Ok(Arc::new(WardenRuntime {
            config,
            manager,
            subscriptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use serde_json::json;
    use warden_core::testing::MockPlatform;
    use warden_framework::{LifecycleEvent, PluginError};

    fn runtime(platform: &Arc<MockPlatform>, plugins: Vec<Arc<Blueprint>>) -> Arc<WardenRuntime> {
        let mut config = WardenConfig::default();
        config.contexts.default = Some(json!({ "plugins": { "greeter": {} } }));

        WardenRuntime::builder(platform.clone())
            .config(config)
            .guild_plugins(plugins)
            .build()
            .unwrap()
    }

    fn greeter() -> Arc<Blueprint> {
        Blueprint::builder("greeter").build().unwrap()
    }

    #[tokio::test]
    async fn test_ready_loads_member_guilds() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1", "g2"]));
        let runtime = runtime(&platform, vec![greeter()]);
        let mut events = runtime.manager().subscribe();

        runtime.start();
        platform.emit("ready", vec![json!({})]).await;

        assert_eq!(
            runtime.manager().loaded_guild_ids(),
            vec![GuildId::from("g1"), GuildId::from("g2")]
        );
        assert!(runtime.manager().get_global_context().is_some());

        let mut finished = false;
        while let Ok(event) = events.try_recv() {
            finished |= matches!(event, LifecycleEvent::LoadingFinished);
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn test_guild_events_drive_manager() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runtime = runtime(&platform, vec![greeter()]);
        runtime.start();

        platform.emit("guildCreate", vec![json!({ "id": "g1" })]).await;
        assert!(runtime.manager().is_guild_loaded(&"g1".into()));

        platform.add_guild("g2");
        platform.emit("guildAvailable", vec![json!({ "id": "g2" })]).await;
        assert!(runtime.manager().is_guild_loaded(&"g2".into()));

        platform.remove_guild(&"g1".into());
        platform.emit("guildDelete", vec![json!({ "id": "g1" })]).await;
        assert!(!runtime.manager().is_guild_loaded(&"g1".into()));

        platform.emit("guildUnavailable", vec![json!({ "id": "g2" })]).await;
        assert!(runtime.manager().loaded_guild_ids().is_empty());
    }

    #[tokio::test]
    async fn test_guild_event_without_id_is_ignored() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runtime = runtime(&platform, vec![greeter()]);
        runtime.start();

        platform.emit("guildCreate", vec![json!({})]).await;
        assert!(runtime.manager().loaded_guild_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_and_unloads() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runtime = runtime(&platform, vec![greeter()]);

        runtime.start();
        runtime.start();
        assert_eq!(platform.listener_count("ready"), 1);
        assert!(runtime.is_running());

        runtime.load_all().await;
        assert!(runtime.manager().is_guild_loaded(&"g1".into()));

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert_eq!(platform.listener_count("ready"), 0);
        assert_eq!(platform.listener_count("guildCreate"), 0);
        assert!(runtime.manager().loaded_guild_ids().is_empty());
        assert!(runtime.manager().get_global_context().is_none());
    }

    #[tokio::test]
    async fn test_run_until_stops_after_shutdown() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let runtime = runtime(&platform, vec![greeter()]);

        let emitter = Arc::clone(&platform);
        runtime
            .run_until(async move {
                emitter.emit("ready", vec![json!({})]).await;
            })
            .await
            .unwrap();

        assert!(!runtime.is_running());
        assert_eq!(platform.listener_count("guildDelete"), 0);
        assert!(runtime.manager().loaded_guild_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_guild_load_is_reported() {
        let platform = Arc::new(MockPlatform::with_guilds(["g1"]));
        let failing = Blueprint::builder("greeter")
            .before_load(|_data| async { Err("boom".into()) })
            .build()
            .unwrap();
        let runtime = runtime(&platform, vec![failing]);

        let reported = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&reported);
        runtime
            .manager()
            .set_error_handler(move |e: &PluginError| sink.lock().push(e.to_string()));

        runtime.start();
        platform.emit("guildCreate", vec![json!({ "id": "g1" })]).await;

        assert_eq!(reported.lock().len(), 1);
        assert!(!runtime.manager().is_guild_loaded(&"g1".into()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let mut config = WardenConfig::default();
        config.host.concurrent_guild_loads = 0;

        let result = WardenRuntime::builder(platform).config(config).build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_duplicate_plugins_rejected() {
        let platform = Arc::new(MockPlatform::new());
        let result = WardenRuntime::builder(platform)
            .config(WardenConfig::default())
            .guild_plugins([greeter(), greeter()])
            .build();
        assert!(matches!(result, Err(RuntimeError::Plugin(_))));
    }
}
