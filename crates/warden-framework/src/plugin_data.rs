//! Live per-context plugin handle.
//!
//! One [`PluginData`] exists per plugin per loaded context. It is what hooks,
//! event handlers and commands receive, and it owns the plugin's managers:
//!
//! | Accessor | Scope |
//! |----------|-------|
//! | [`config`](PluginData::config) | this plugin, this context's levels |
//! | [`locks`](PluginData::locks) | shared by every plugin in the context |
//! | [`cooldowns`](PluginData::cooldowns) | this plugin |
//! | [`events`](PluginData::events) | this plugin |
//! | [`commands`](PluginData::commands) | this plugin |
//! | [`state`](PluginData::state) | this plugin, typed values |
//!
//! Sibling lookups ([`has_plugin`](PluginData::has_plugin),
//! [`get_plugin`](PluginData::get_plugin)) check the current [`PluginPhase`]
//! and fail with [`PluginError::CapabilityUnavailable`] outside the window in
//! which every sibling is guaranteed to exist.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use warden_core::{BoxedPlatform, ContextId, GuildId, LockManager};

use crate::commands::PluginCommandManager;
use crate::config::PluginConfigManager;
use crate::context::Context;
use crate::cooldown::CooldownManager;
use crate::error::{PluginError, PluginPhase, PluginResult};
use crate::events::PluginEventManager;

// =============================================================================
// Typed state
// =============================================================================

/// Type-keyed storage for a plugin's own state.
#[derive(Default)]
pub struct StateMap {
    values: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl StateMap {
    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.values.write().insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.values.read().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl fmt::Debug for StateMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMap")
            .field("len", &self.values.read().len())
            .finish()
    }
}

// =============================================================================
// PluginData
// =============================================================================

pub(crate) struct PluginDataParts {
    pub name: String,
    pub context: Weak<Context>,
    pub context_id: ContextId,
    pub prefix: String,
    pub config: PluginConfigManager,
    pub locks: Arc<LockManager>,
    pub cooldowns: CooldownManager,
    pub events: PluginEventManager,
    pub platform: BoxedPlatform,
}

pub struct PluginData {
    name: String,
    context: Weak<Context>,
    context_id: ContextId,
    prefix: String,
    config: PluginConfigManager,
    locks: Arc<LockManager>,
    cooldowns: CooldownManager,
    events: PluginEventManager,
    commands: PluginCommandManager,
    state: StateMap,
    platform: BoxedPlatform,
    phase: RwLock<PluginPhase>,
    loaded: AtomicBool,
}

impl PluginData {
    pub(crate) fn new(parts: PluginDataParts) -> Self {
        Self {
            name: parts.name,
            context: parts.context,
            context_id: parts.context_id,
            prefix: parts.prefix,
            config: parts.config,
            locks: parts.locks,
            cooldowns: parts.cooldowns,
            events: parts.events,
            commands: PluginCommandManager::new(),
            state: StateMap::default(),
            platform: parts.platform,
            phase: RwLock::new(PluginPhase::BeforeLoad),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn guild_id(&self) -> Option<&GuildId> {
        self.context_id.guild_id()
    }

    /// Message command prefix of this context.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &PluginConfigManager {
        &self.config
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    pub fn events(&self) -> &PluginEventManager {
        &self.events
    }

    pub fn commands(&self) -> &PluginCommandManager {
        &self.commands
    }

    pub fn state(&self) -> &StateMap {
        &self.state
    }

    pub fn platform(&self) -> &BoxedPlatform {
        &self.platform
    }

    pub fn phase(&self) -> PluginPhase {
        *self.phase.read()
    }

    /// Whether registration finished and unload has not started tearing down.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub(crate) fn set_phase(&self, phase: PluginPhase) {
        *self.phase.write() = phase;
    }

    pub(crate) fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    fn check_access(&self, capability: &'static str) -> PluginResult<Arc<Context>> {
        let phase = self.phase();
        if !phase.allows_plugin_access() {
            return Err(PluginError::CapabilityUnavailable { capability, phase });
        }
        // The context outlives every phase in which access is allowed.
        self.context
            .upgrade()
            .ok_or(PluginError::CapabilityUnavailable { capability, phase })
    }

    /// Whether `name` is loaded in the same context.
    pub fn has_plugin(&self, name: &str) -> PluginResult<bool> {
        let context = self.check_access("has_plugin")?;
        Ok(context.get_plugin(name).is_some())
    }

    /// The public interface of sibling plugin `name`.
    pub fn get_plugin<T: Send + Sync + 'static>(&self, name: &str) -> PluginResult<Arc<T>> {
        let context = self.check_access("get_plugin")?;
        let plugin = context
            .get_plugin(name)
            .ok_or_else(|| PluginError::not_loaded(name))?;
        plugin
            .public_interface()
            .and_then(|interface| interface.downcast::<T>().ok())
            .ok_or_else(|| PluginError::InterfaceType {
                name: name.to_string(),
            })
    }

    /// Releases per-plugin resources: cooldown timers, relay listeners
    /// (waiting up to `drain_timeout` for in-flight handlers) and commands.
    pub(crate) async fn teardown(&self, drain_timeout: Duration) {
        self.cooldowns.destroy();
        self.events.clear_all(drain_timeout).await;
        self.commands.clear();
    }
}

impl fmt::Debug for PluginData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginData")
            .field("name", &self.name)
            .field("context", &self.context_id)
            .field("phase", &self.phase())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_state_map_is_type_keyed() {
        let state = StateMap::default();
        state.insert(Counter(1));
        state.insert(String::from("x"));

        assert_eq!(*state.get::<Counter>().unwrap(), Counter(1));
        assert_eq!(state.get::<String>().unwrap().as_str(), "x");
        assert!(state.get::<u8>().is_none());

        state.insert(Counter(2));
        assert_eq!(state.remove::<Counter>().unwrap().0, 2);
        assert!(!state.contains::<Counter>());
    }
}
