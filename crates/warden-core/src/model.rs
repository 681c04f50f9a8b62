//! Platform entity snapshots carried in event arguments.
//!
//! These are the minimal fields the host needs for routing, permission
//! resolution and command dispatch. Platform clients deliver them as JSON
//! values inside [`RawEvent`](crate::platform::RawEvent) arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::GuildId;

/// A user account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bot: bool,
}

/// A user's membership in a guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub author: UserInfo,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    /// Parent category of the channel, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Set when the message was posted in a thread; `channel_id` is then the
    /// thread's parent channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
}

/// An application (slash) command invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionInfo {
    pub id: String,
    pub command_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub user: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberInfo>,
    /// Option values keyed by option name.
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_defaults() {
        let msg: MessageInfo = serde_json::from_value(json!({
            "id": "1",
            "author": { "id": "u1" },
            "channel_id": "c1",
        }))
        .unwrap();

        assert_eq!(msg.content, "");
        assert!(msg.guild_id.is_none());
        assert!(msg.member.is_none());
        assert!(!msg.author.bot);
    }
}
