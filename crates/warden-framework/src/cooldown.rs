//! Keyed cooldowns with periodic cleanup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Tracks expiry instants per key.
///
/// A background task purges expired keys every cleanup interval until
/// [`destroy`](Self::destroy) is called or the manager is dropped.
#[derive(Debug)]
pub struct CooldownManager {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    cleanup: CancellationToken,
}

impl CooldownManager {
    /// Must be called from within a Tokio runtime.
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<String, Instant>>> = Arc::default();
        let cleanup = CancellationToken::new();

        let weak = Arc::downgrade(&entries);
        let token = cleanup.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(entries) = weak.upgrade() else { break };
                        let now = Instant::now();
                        let mut entries = entries.lock();
                        let before = entries.len();
                        entries.retain(|_, expires| *expires > now);
                        trace!(removed = before - entries.len(), "Purged expired cooldowns");
                    }
                }
            }
        });

        Self { entries, cleanup }
    }

    pub fn set_cooldown(&self, key: impl Into<String>, duration: Duration) {
        self.entries.lock().insert(key.into(), Instant::now() + duration);
    }

    pub fn is_on_cooldown(&self, key: &str) -> bool {
        self.remaining(key).is_some()
    }

    /// Time left on `key`, or `None` if it is not on cooldown.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let expires = *self.entries.lock().get(key)?;
        let now = Instant::now();
        (expires > now).then(|| expires - now)
    }

    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the cleanup task and forgets every cooldown.
    pub fn destroy(&self) {
        self.cleanup.cancel();
        self.entries.lock().clear();
    }
}

impl Drop for CooldownManager {
    fn drop(&mut self) {
        self.cleanup.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let cooldowns = CooldownManager::new(Duration::from_secs(60));
        cooldowns.set_cooldown("ping:u1", Duration::from_secs(5));

        assert!(cooldowns.is_on_cooldown("ping:u1"));
        assert!(!cooldowns.is_on_cooldown("ping:u2"));

        advance(Duration::from_secs(3)).await;
        assert_eq!(cooldowns.remaining("ping:u1"), Some(Duration::from_secs(2)));

        advance(Duration::from_secs(2)).await;
        assert!(!cooldowns.is_on_cooldown("ping:u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_purges_expired_keys() {
        let cooldowns = CooldownManager::new(Duration::from_secs(10));
        cooldowns.set_cooldown("short", Duration::from_secs(1));
        cooldowns.set_cooldown("long", Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cooldowns.len(), 1);
        assert!(cooldowns.is_on_cooldown("long"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_destroy() {
        let cooldowns = CooldownManager::new(Duration::from_secs(10));
        cooldowns.set_cooldown("a", Duration::from_secs(5));
        cooldowns.set_cooldown("b", Duration::from_secs(5));

        cooldowns.clear("a");
        assert!(!cooldowns.is_on_cooldown("a"));

        cooldowns.destroy();
        assert!(cooldowns.is_empty());
    }
}
