//! Identifier types shared across the workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a guild (an isolated tenant scope).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(String);

impl GuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GuildId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GuildId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for GuildId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies a plugin-loading scope: the single global context or one guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextId {
    Global,
    Guild(GuildId),
}

impl ContextId {
    /// The guild id, if this is a guild context.
    pub fn guild_id(&self) -> Option<&GuildId> {
        match self {
            ContextId::Global => None,
            ContextId::Guild(id) => Some(id),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ContextId::Global)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Global => f.write_str("global"),
            ContextId::Guild(id) => write!(f, "guild:{id}"),
        }
    }
}

impl From<GuildId> for ContextId {
    fn from(id: GuildId) -> Self {
        ContextId::Guild(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_display() {
        assert_eq!(ContextId::Global.to_string(), "global");
        assert_eq!(ContextId::from(GuildId::from("123")).to_string(), "guild:123");
    }

    #[test]
    fn test_guild_id_serde_transparent() {
        let id: GuildId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
    }
}
