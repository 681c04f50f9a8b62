//! Plugin-loading scopes.
//!
//! A [`Context`] is either one guild or the single global scope. It holds the
//! config snapshot fetched for the load, the [`LockManager`] shared by its
//! plugins, and its loaded plugins in load order.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use warden_core::{ContextId, GuildId, LockManager};

use crate::blueprint::Blueprint;
use crate::config::ContextConfig;
use crate::plugin_data::PluginData;

/// A plugin instantiated in a context.
pub struct LoadedPlugin {
    blueprint: Arc<Blueprint>,
    data: Arc<PluginData>,
    loaded_as_dependency: bool,
    public: OnceLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl LoadedPlugin {
    pub(crate) fn new(blueprint: Arc<Blueprint>, data: Arc<PluginData>, loaded_as_dependency: bool) -> Self {
        Self {
            blueprint,
            data,
            loaded_as_dependency,
            public: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.blueprint.name()
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    pub fn data(&self) -> &Arc<PluginData> {
        &self.data
    }

    /// Loaded only because an enabled plugin depends on it. Such plugins run
    /// their hooks but register no events or commands.
    pub fn loaded_as_dependency(&self) -> bool {
        self.loaded_as_dependency
    }

    /// Built once, on first request.
    pub fn public_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.public
            .get_or_init(|| {
                self.blueprint
                    .public()
                    .map(|factory| factory(Arc::clone(&self.data)))
            })
            .clone()
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.name())
            .field("loaded_as_dependency", &self.loaded_as_dependency)
            .finish()
    }
}

/// A guild or the global plugin-loading scope.
pub struct Context {
    id: ContextId,
    config: ContextConfig,
    levels: Arc<HashMap<String, i64>>,
    locks: Arc<LockManager>,
    plugins: RwLock<Vec<Arc<LoadedPlugin>>>,
}

impl Context {
    pub(crate) fn new(id: ContextId, config: ContextConfig, locks: LockManager) -> Self {
        let levels = Arc::new(config.levels.clone());
        Self {
            id,
            config,
            levels,
            locks: Arc::new(locks),
            plugins: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn guild_id(&self) -> Option<&GuildId> {
        self.id.guild_id()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn levels(&self) -> &Arc<HashMap<String, i64>> {
        &self.levels
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Loaded plugins, in load order.
    pub fn loaded_plugins(&self) -> Vec<Arc<LoadedPlugin>> {
        self.plugins.read().clone()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.name().to_string()).collect()
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.read().iter().find(|p| p.name() == name).cloned()
    }

    pub(crate) fn insert_plugin(&self, plugin: Arc<LoadedPlugin>) {
        self.plugins.write().push(plugin);
    }

    pub(crate) fn remove_plugin(&self, name: &str) {
        self.plugins.write().retain(|p| p.name() != name);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("plugins", &self.plugin_names())
            .finish_non_exhaustive()
    }
}
