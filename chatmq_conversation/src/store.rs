//! Process-wide conversation store keyed by user identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatmq_core::Turn;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::window::{ConversationWindow, WindowConfig};

struct Entry {
    window: ConversationWindow,
    /// Serializes message handling for this identity
    lock: Arc<Mutex<()>>,
    touched: DateTime<Utc>,
}

impl Entry {
    fn new(config: &WindowConfig) -> Self {
        Self {
            window: ConversationWindow::new(config),
            lock: Arc::new(Mutex::new(())),
            touched: Utc::now(),
        }
    }

    /// An entry whose lock is handed out may have a handler in flight.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.lock) > 1
    }
}

/// Mapping from user identity to its conversation window.
///
/// Unknown identities are first contact, never an error. The number of
/// tracked identities is capped; inserting past the cap evicts the
/// least recently touched idle identity.
pub struct ConversationStore {
    config: WindowConfig,
    max_identities: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConversationStore {
    pub const DEFAULT_MAX_IDENTITIES: usize = 10_000;

    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            max_identities: Self::DEFAULT_MAX_IDENTITIES,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_max_identities(mut self, max: usize) -> Self {
        self.max_identities = max.max(1);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Existing window for `user_id`, or a freshly seeded one.
    pub async fn get_or_init(&self, user_id: &str) -> ConversationWindow {
        let mut entries = self.entries.lock().await;
        self.entry(&mut entries, user_id).window.clone()
    }

    /// Append `turn` to the identity's window and enforce the cap.
    pub async fn append_and_trim(&self, user_id: &str, turn: Turn) -> ConversationWindow {
        let mut entries = self.entries.lock().await;
        let entry = self.entry(&mut entries, user_id);
        entry.window.push_and_trim(turn);
        entry.touched = Utc::now();
        entry.window.clone()
    }

    /// Per-identity mutex. Holding its guard keeps the identity from being
    /// evicted or reaped and serializes concurrent handlers for it.
    pub async fn identity_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut entries = self.entries.lock().await;
        Arc::clone(&self.entry(&mut entries, user_id).lock)
    }

    /// Snapshot of a window without creating one.
    pub async fn window(&self, user_id: &str) -> Option<ConversationWindow> {
        self.entries
            .lock()
            .await
            .get(user_id)
            .map(|entry| entry.window.clone())
    }

    /// Forget one identity. Returns whether it was removed.
    ///
    /// An identity with a handler in flight is kept, since removing it would
    /// hand the next handler a fresh lock.
    pub async fn reset(&self, user_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(user_id) {
            Some(entry) if entry.in_use() => {
                debug!("Not resetting {user_id}, a message is being handled");
                false
            }
            Some(_) => entries.remove(user_id).is_some(),
            None => false,
        }
    }

    /// Drop identities idle for longer than `ttl`. Returns how many were removed.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.reap_untouched_since(cutoff).await
    }

    async fn reap_untouched_since(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.in_use() || entry.touched >= cutoff);
        let removed = before - entries.len();
        if removed > 0 {
            info!("Reaped {removed} idle conversations, {} remain", entries.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    fn entry<'a>(&self, entries: &'a mut HashMap<String, Entry>, user_id: &str) -> &'a mut Entry {
        if !entries.contains_key(user_id) {
            if entries.len() >= self.max_identities {
                Self::evict_least_recent(entries);
            }
            debug!("First contact from {user_id}");
        }
        entries
            .entry(user_id.to_string())
            .or_insert_with(|| Entry::new(&self.config))
    }

    fn evict_least_recent(entries: &mut HashMap<String, Entry>) {
        let oldest = entries
            .iter()
            .filter(|(_, entry)| !entry.in_use())
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(user_id, _)| user_id.clone());

        if let Some(user_id) = oldest {
            entries.remove(&user_id);
            info!("Identity cap reached, evicted conversation for {user_id}");
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::new(
            WindowConfig::default()
                .with_system_prompt(Some("persona".to_string()))
                .with_max_turns(5),
        )
    }

    #[tokio::test]
    async fn first_contact_creates_seeded_window() {
        let store = store();
        assert!(store.is_empty().await);

        let window = store.get_or_init("u1").await;
        assert_eq!(window.turns(), [Turn::system("persona")]);
        assert_eq!(store.len().await, 1);

        // Second lookup returns the same window, not a new one
        store.append_and_trim("u1", Turn::user("hi")).await;
        assert_eq!(store.get_or_init("u1").await.len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn append_and_trim_keeps_cap_per_identity() {
        let store = store();
        for i in 0..12 {
            let window = store.append_and_trim("u1", Turn::user(format!("m{i}"))).await;
            assert!(window.len() <= 5);
            assert_eq!(window.turns()[0], Turn::system("persona"));
        }
        store.append_and_trim("u2", Turn::user("other")).await;

        let u1 = store.window("u1").await.unwrap_or_else(|| ConversationWindow::new(store.config()));
        let last: Vec<&str> = u1.turns()[1..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(last, ["m8", "m9", "m10", "m11"]);
        assert_eq!(store.window("u2").await.map(|w| w.len()), Some(2));
    }

    #[tokio::test]
    async fn identity_cap_evicts_least_recently_touched() {
        let store = store().with_max_identities(2);
        store.append_and_trim("old", Turn::user("a")).await;
        store.append_and_trim("new", Turn::user("b")).await;
        store.append_and_trim("old", Turn::user("c")).await;

        store.get_or_init("third").await;

        assert_eq!(store.len().await, 2);
        assert!(store.window("new").await.is_none());
        assert!(store.window("old").await.is_some());
    }

    #[tokio::test]
    async fn locked_identity_is_not_evicted() {
        let store = store().with_max_identities(1);
        let lock = store.identity_lock("busy").await;
        let _guard = lock.lock().await;

        store.get_or_init("visitor").await;

        assert!(store.window("busy").await.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn reap_removes_only_idle_identities() {
        let store = store();
        store.get_or_init("u1").await;
        store.get_or_init("u2").await;

        assert_eq!(store.reap_idle(Duration::from_secs(3600)).await, 0);

        let held = store.identity_lock("u2").await;
        assert_eq!(store.reap_untouched_since(Utc::now() + chrono::Duration::seconds(1)).await, 1);
        assert!(store.window("u1").await.is_none());
        assert!(store.window("u2").await.is_some());
        drop(held);
    }

    #[tokio::test]
    async fn reset_forgets_history() {
        let store = store();
        store.append_and_trim("u1", Turn::user("hi")).await;
        assert!(store.reset("u1").await);
        assert!(!store.reset("u1").await);
        assert_eq!(store.get_or_init("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn reset_keeps_identity_while_locked() {
        let store = store();
        store.append_and_trim("u1", Turn::user("hi")).await;
        let lock = store.identity_lock("u1").await;

        assert!(!store.reset("u1").await);
        assert_eq!(store.window("u1").await.map(|w| w.len()), Some(2));
        // Same lock is handed out again, so exclusion still holds
        assert!(Arc::ptr_eq(&lock, &store.identity_lock("u1").await));

        drop(lock);
        assert!(store.reset("u1").await);
    }
}
