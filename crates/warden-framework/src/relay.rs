//! Multiplexed relay from platform events to scoped listeners.
//!
//! The relay holds at most one low-level [`Platform`] subscription per event
//! name, however many listeners exist for it. Each raw event is converted to
//! named [`EventArgs`] and its guild resolved through [`EventSpecs`], then
//! delivered to:
//!
//! 1. listeners registered for that guild and event name, then
//! 2. listeners registered for the event name in any guild.
//!
//! ```text
//!                               ┌─► guild "1" / messageCreate ─► [l1, l2]
//! Platform ─ messageCreate ─► Relay
//!                               └─► any / messageCreate ───────► [l3]
//! ```
//!
//! Listeners run concurrently and are timed individually under
//! `event:<name>`; a failing or panicking listener is logged and does not
//! affect its siblings.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::Instant;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, ServiceExt};
use tracing::{error, trace};
use warden_core::{BoxedPlatform, EventArgs, EventSpecs, GuildId, RawEvent, SubscriptionId};

use crate::profiler::Profiler;

/// A relay listener.
pub type EventListener = BoxCloneSyncService<Arc<EventArgs>, (), BoxError>;

/// Handle for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    /// Used in logs, normally the owning plugin's name.
    owner: String,
    listener: EventListener,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Bucket {
    Guild(GuildId, String),
    Any(String),
}

impl Bucket {
    fn event(&self) -> &str {
        match self {
            Bucket::Guild(_, event) | Bucket::Any(event) => event,
        }
    }
}

#[derive(Default)]
struct RelayState {
    buckets: HashMap<Bucket, Vec<Entry>>,
    index: HashMap<ListenerId, Bucket>,
    subscriptions: HashMap<String, SubscriptionId>,
    next_id: u64,
}

/// Routes platform events to guild-scoped and any-scoped listeners.
pub struct EventRelay {
    platform: BoxedPlatform,
    specs: EventSpecs,
    profiler: Arc<Profiler>,
    state: Mutex<RelayState>,
    this: Weak<EventRelay>,
}

impl EventRelay {
    pub fn new(platform: BoxedPlatform, specs: EventSpecs, profiler: Arc<Profiler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            platform,
            specs,
            profiler,
            state: Mutex::new(RelayState::default()),
            this: this.clone(),
        })
    }

    /// Registers a listener for `event` in `guild` only.
    pub fn on_guild_event(
        &self,
        guild: GuildId,
        event: &str,
        owner: impl Into<String>,
        listener: EventListener,
    ) -> ListenerId {
        self.register(Bucket::Guild(guild, event.to_string()), owner.into(), listener)
    }

    /// Registers a listener for `event` in every guild (and guild-less events).
    pub fn on_any_event(
        &self,
        event: &str,
        owner: impl Into<String>,
        listener: EventListener,
    ) -> ListenerId {
        self.register(Bucket::Any(event.to_string()), owner.into(), listener)
    }

    fn register(&self, bucket: Bucket, owner: String, listener: EventListener) -> ListenerId {
        let event = bucket.event().to_string();
        let mut state = self.state.lock();

        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.index.insert(id, bucket.clone());
        state.buckets.entry(bucket).or_default().push(Entry {
            id,
            owner,
            listener,
        });

        if !state.subscriptions.contains_key(&event) {
            let subscription = self.platform.subscribe(&event, self.raw_listener());
            state.subscriptions.insert(event.clone(), subscription);
            trace!(event = %event, "Subscribed to platform event");
        }

        id
    }

    fn raw_listener(&self) -> warden_core::RawListener {
        let relay = self.this.clone();
        Arc::new(move |raw: RawEvent| {
            let relay = relay.clone();
            async move {
                if let Some(relay) = relay.upgrade() {
                    relay.dispatch(raw).await;
                }
            }
            .boxed()
        })
    }

    /// Removes a listener. Drops the platform subscription once no listener
    /// for that event name remains.
    pub fn off(&self, id: ListenerId) {
        let mut state = self.state.lock();
        let Some(bucket) = state.index.remove(&id) else {
            return;
        };

        if let Some(entries) = state.buckets.get_mut(&bucket) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                state.buckets.remove(&bucket);
            }
        }

        let event = bucket.event();
        if !state.buckets.keys().any(|b| b.event() == event)
            && let Some(subscription) = state.subscriptions.remove(event)
        {
            self.platform.unsubscribe(subscription);
            trace!(event = %event, "Unsubscribed from platform event");
        }
    }

    /// Delivers one raw event to every matching listener.
    pub async fn dispatch(&self, raw: RawEvent) {
        let (args, guild) = self.specs.convert(&raw);
        let args = Arc::new(args);

        let entries: Vec<Entry> = {
            let state = self.state.lock();
            let guild_bucket = guild
                .map(|g| Bucket::Guild(g, raw.name.clone()))
                .and_then(|b| state.buckets.get(&b));
            let any_bucket = state.buckets.get(&Bucket::Any(raw.name.clone()));
            guild_bucket
                .into_iter()
                .chain(any_bucket)
                .flatten()
                .cloned()
                .collect()
        };

        if entries.is_empty() {
            return;
        }
        trace!(event = %raw.name, listeners = entries.len(), "Dispatching event");

        let profile_key = format!("event:{}", raw.name);
        join_all(entries.into_iter().map(|entry| {
            let args = Arc::clone(&args);
            let event = raw.name.as_str();
            let profile_key = profile_key.as_str();
            async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(entry.listener.oneshot(args))
                    .catch_unwind()
                    .await;
                self.profiler.add_data_point(profile_key, started.elapsed());

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(event = %event, plugin = %entry.owner, "Event listener failed: {e}");
                    }
                    Err(_) => {
                        error!(event = %event, plugin = %entry.owner, "Event listener panicked");
                    }
                }
            }
        }))
        .await;
    }

    /// Number of listeners for `event` across all buckets.
    pub fn listener_count(&self, event: &str) -> usize {
        self.state
            .lock()
            .buckets
            .iter()
            .filter(|(bucket, _)| bucket.event() == event)
            .map(|(_, entries)| entries.len())
            .sum()
    }

    /// Whether a platform subscription exists for `event`.
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.state.lock().subscriptions.contains_key(event)
    }

    pub fn specs(&self) -> &EventSpecs {
        &self.specs
    }

    pub fn platform(&self) -> &BoxedPlatform {
        &self.platform
    }
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventRelay")
            .field("buckets", &state.buckets.len())
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}
