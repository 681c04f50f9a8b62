//! Level Gate Demo
//!
//! A single plugin with a `ping` command that only members at level 50 or
//! above may use, and a greeting for new members. The platform is the
//! in-memory `MockPlatform`, so the demo scripts its own traffic:
//!
//! ```text
//! ready ──► guilds 1001 and 1002 load
//! !ping from a regular member ──► ignored (can_ping = false)
//! !ping from a moderator      ──► runs   (override: level >= 50)
//! guildDelete 1002            ──► 1002 unloads
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package level-gate
//! ```

use std::sync::Arc;

use serde_json::{Value, json};
use warden::core::testing::MockPlatform;
use warden::prelude::*;

fn level_gate() -> Result<Arc<Blueprint>, BoxError> {
    let ping = MessageCommandBlueprint::new("ping", |call| async move {
        info!(
            guild = %call.plugin.context_id(),
            user = %call.message.author.id,
            "Pong!"
        );
        Ok(())
    })
    .alias("p")
    .description("Replies with pong")
    .permission("can_ping");

    let defaults = serde_json::from_value(json!({
        "config": { "can_ping": false, "greeting": "Welcome!" },
        "overrides": [{ "level": ">=50", "config": { "can_ping": true } }]
    }))?;

    Blueprint::builder("level_gate")
        .default_options(defaults)
        .after_load(|data| async move {
            let greeting = data.config().get()["greeting"].clone();
            info!(guild = %data.context_id(), prefix = data.prefix(), %greeting, "Level gate ready");
            Ok(())
        })
        .event("guildMemberAdd", |data, args| async move {
            let member = args.get("member").cloned().unwrap_or(Value::Null);
            info!(
                guild = %data.context_id(),
                user = %member["user"]["id"],
                greeting = %data.config().get()["greeting"],
                "Member joined"
            );
            Ok(())
        })
        .message_command(ping)
        .build()
        .map_err(Into::into)
}

fn message(guild: &str, content: &str, user: &str, roles: &[&str]) -> Vec<Value> {
    vec![json!({
        "id": format!("{guild}-{user}"),
        "content": content,
        "author": { "id": user },
        "channel_id": "general",
        "guild_id": guild,
        "member": { "user": { "id": user }, "roles": roles },
    })]
}

async fn script(platform: Arc<MockPlatform>) {
    platform.emit("ready", vec![json!({})]).await;

    platform
        .emit("messageCreate", message("1001", "!ping", "alice", &[]))
        .await;
    platform
        .emit("messageCreate", message("1001", "!ping", "bob", &["moderators"]))
        .await;
    platform
        .emit("messageCreate", message("1002", "?p", "bob", &["moderators"]))
        .await;
    platform
        .emit(
            "guildMemberAdd",
            vec![json!({ "user": { "id": "carol" }, "guild_id": "1002" })],
        )
        .await;

    platform.remove_guild(&"1002".into());
    platform.emit("guildDelete", vec![json!({ "id": "1002" })]).await;
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let platform = Arc::new(MockPlatform::with_guilds(["1001", "1002"]));

    let runtime = WardenRuntime::builder(platform.clone())
        .config_file(concat!(env!("CARGO_MANIFEST_DIR"), "/warden.toml"))
        .guild_plugin(level_gate()?)
        .build()?;

    let mut lifecycle = runtime.manager().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            info!(?event, "Lifecycle");
        }
    });

    runtime.run_until(script(platform)).await?;

    let mut points: Vec<_> = runtime.manager().profiler().data_points().into_iter().collect();
    points.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, point) in points {
        info!(%key, count = point.count, avg_us = point.average().as_micros() as u64, "Profile");
    }

    Ok(())
}
