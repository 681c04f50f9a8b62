//! Per-plugin event registrations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, service_fn};
use tracing::{debug, warn};
use warden_core::{ContextId, EventArgs};

use crate::relay::{EventRelay, ListenerId};

/// Registers a plugin's listeners with the relay, scoped to its context.
///
/// Guild plugins listen in their own guild only; global plugins listen in
/// every guild. Every invocation is tracked so that unload can wait for
/// in-flight handlers.
#[derive(Debug)]
pub struct PluginEventManager {
    relay: Arc<EventRelay>,
    context: ContextId,
    owner: String,
    listeners: Mutex<Vec<ListenerId>>,
    tracker: TaskTracker,
}

impl PluginEventManager {
    pub fn new(relay: Arc<EventRelay>, context: ContextId, owner: impl Into<String>) -> Self {
        Self {
            relay,
            context,
            owner: owner.into(),
            listeners: Mutex::new(Vec::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Registers `handler` for `event`.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(Arc<EventArgs>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let tracker = self.tracker.clone();
        let service = BoxCloneSyncService::new(service_fn(move |args: Arc<EventArgs>| {
            tracker.track_future(handler(args))
        }));

        let id = match self.context.guild_id() {
            Some(guild) => self
                .relay
                .on_guild_event(guild.clone(), event, self.owner.clone(), service),
            None => self.relay.on_any_event(event, self.owner.clone(), service),
        };
        self.listeners.lock().push(id);
        id
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|l| *l != id);
        self.relay.off(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Number of handler invocations still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Removes every listener, then waits up to `drain_timeout` for
    /// in-flight handlers to finish.
    pub async fn clear_all(&self, drain_timeout: Duration) {
        let ids = std::mem::take(&mut *self.listeners.lock());
        for id in ids {
            self.relay.off(id);
        }

        self.tracker.close();
        if tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                plugin = %self.owner,
                context = %self.context,
                in_flight = self.tracker.len(),
                "Event handlers still running after drain timeout"
            );
        } else {
            debug!(plugin = %self.owner, context = %self.context, "Event listeners cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::EventSpecs;
    use warden_core::testing::MockPlatform;

    fn message(guild: &str) -> Vec<serde_json::Value> {
        vec![json!({ "id": "m", "author": { "id": "u" }, "channel_id": "c", "guild_id": guild })]
    }

    #[tokio::test]
    async fn test_guild_plugin_only_sees_its_guild() {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new(platform.clone(), EventSpecs::default(), Arc::default());
        let events = PluginEventManager::new(relay, ContextId::Guild("g1".into()), "p");
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        events.on("messageCreate", move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        platform.emit("messageCreate", message("g1")).await;
        platform.emit("messageCreate", message("g2")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_global_plugin_sees_every_guild() {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new(platform.clone(), EventSpecs::default(), Arc::default());
        let events = PluginEventManager::new(relay, ContextId::Global, "p");
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        events.on("messageCreate", move |_args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        platform.emit("messageCreate", message("g1")).await;
        platform.emit("messageCreate", message("g2")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_waits_for_in_flight_handlers() {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new(platform.clone(), EventSpecs::default(), Arc::default());
        let events = Arc::new(PluginEventManager::new(
            relay.clone(),
            ContextId::Guild("g1".into()),
            "p",
        ));
        let done = Arc::new(AtomicUsize::new(0));

        let finished = Arc::clone(&done);
        events.on("messageCreate", move |_args| {
            let finished = Arc::clone(&finished);
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let emitter = Arc::clone(&platform);
        let emitting = tokio::spawn(async move { emitter.emit("messageCreate", message("g1")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(events.in_flight(), 1);

        events.clear_all(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(relay.listener_count("messageCreate"), 0);
        emitting.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_gives_up_after_timeout() {
        let platform = Arc::new(MockPlatform::new());
        let relay = EventRelay::new(platform.clone(), EventSpecs::default(), Arc::default());
        let events = PluginEventManager::new(relay, ContextId::Guild("g1".into()), "p");

        events.on("messageCreate", |_args| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });

        let emitter = Arc::clone(&platform);
        tokio::spawn(async move { emitter.emit("messageCreate", message("g1")).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        events.clear_all(Duration::from_secs(2)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(events.in_flight(), 1);
    }
}
