//! Error types for the Warden framework.
//!
//! Every error here is `Clone`: sources are held as [`SharedError`] so a
//! single in-flight global load can hand the same failure to every awaiter.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tower::BoxError;
use warden_core::{ContextId, QueueError};

/// A cloneable, type-erased error source.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Converts a hook's [`BoxError`] into a [`SharedError`].
pub fn share(error: BoxError) -> SharedError {
    Arc::from(error)
}

// =============================================================================
// Phases and hooks
// =============================================================================

/// Lifecycle phase of one plugin inside one context.
///
/// ```text
/// BeforeLoad ──► BeforeStart ──► Loaded ──► BeforeUnload ──► AfterUnload
/// ```
///
/// `has_plugin`/`get_plugin` are available from `BeforeStart` through
/// `BeforeUnload` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginPhase {
    BeforeLoad,
    BeforeStart,
    Loaded,
    BeforeUnload,
    AfterUnload,
}

impl PluginPhase {
    /// Whether sibling plugins may be looked up in this phase.
    pub fn allows_plugin_access(self) -> bool {
        matches!(
            self,
            PluginPhase::BeforeStart | PluginPhase::Loaded | PluginPhase::BeforeUnload
        )
    }
}

impl fmt::Display for PluginPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginPhase::BeforeLoad => "beforeLoad",
            PluginPhase::BeforeStart => "beforeStart",
            PluginPhase::Loaded => "loaded",
            PluginPhase::BeforeUnload => "beforeUnload",
            PluginPhase::AfterUnload => "afterUnload",
        })
    }
}

/// A blueprint lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeLoad,
    BeforeStart,
    AfterLoad,
    BeforeUnload,
    AfterUnload,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::BeforeLoad => "beforeLoad",
            HookKind::BeforeStart => "beforeStart",
            HookKind::AfterLoad => "afterLoad",
            HookKind::BeforeUnload => "beforeUnload",
            HookKind::AfterUnload => "afterUnload",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Config validation
// =============================================================================

/// A plugin's config parser (or the override deserializer) rejected a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid plugin config: {message}")]
pub struct ConfigValidationError {
    pub message: String,
}

impl ConfigValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigValidationError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

// =============================================================================
// Load errors
// =============================================================================

/// `beforeLoad` or `beforeStart` failed (or the plugin's config was rejected).
#[derive(Debug, Clone, Error)]
#[error("failed to load plugin '{plugin}' in {context} during {hook}: {source}")]
pub struct PluginLoadError {
    pub plugin: String,
    pub context: ContextId,
    pub hook: HookKind,
    #[source]
    pub source: SharedError,
}

impl PluginLoadError {
    pub fn new(
        plugin: impl Into<String>,
        context: ContextId,
        hook: HookKind,
        source: SharedError,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            context,
            hook,
            source,
        }
    }
}

// =============================================================================
// PluginError
// =============================================================================

/// Errors raised by the plugin framework.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error(transparent)]
    Load(#[from] PluginLoadError),

    /// An enabled plugin name has no registered blueprint.
    #[error("unknown plugin '{name}'")]
    UnknownPlugin { name: String },

    /// `get_plugin` named a plugin that is not loaded in this context.
    #[error("plugin '{name}' is not loaded")]
    PluginNotLoaded { name: String },

    /// `has_plugin`/`get_plugin` called outside `beforeStart..=beforeUnload`.
    #[error("{capability} is not available during {phase}")]
    CapabilityUnavailable {
        capability: &'static str,
        phase: PluginPhase,
    },

    #[error(transparent)]
    ConfigValidation(#[from] ConfigValidationError),

    #[error("duplicate plugin name '{name}'")]
    DuplicatePlugin { name: String },

    #[error("plugin blueprint has no name")]
    MissingName,

    /// The config backend failed.
    #[error("failed to fetch config for {context}: {source}")]
    Config {
        context: ContextId,
        #[source]
        source: SharedError,
    },

    /// `afterLoad`, `beforeUnload` or `afterUnload` failed.
    #[error("plugin '{plugin}' {hook} hook failed: {source}")]
    Hook {
        plugin: String,
        hook: HookKind,
        #[source]
        source: SharedError,
    },

    #[error("guild queue: {0}")]
    Queue(#[from] QueueError),

    /// The plugin has no public interface, or it is not of the requested type.
    #[error("plugin '{name}' does not expose the requested interface")]
    InterfaceType { name: String },
}

impl PluginError {
    pub fn hook(plugin: impl Into<String>, hook: HookKind, source: BoxError) -> Self {
        Self::Hook {
            plugin: plugin.into(),
            hook,
            source: share(source),
        }
    }

    pub fn config(context: ContextId, source: SharedError) -> Self {
        Self::Config { context, source }
    }

    pub fn unknown_plugin(name: impl Into<String>) -> Self {
        Self::UnknownPlugin { name: name.into() }
    }

    pub fn not_loaded(name: impl Into<String>) -> Self {
        Self::PluginNotLoaded { name: name.into() }
    }
}

/// Result type for framework operations.
pub type PluginResult<T> = Result<T, PluginError>;
