//! Per-user notification store with write-through persistence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::migration;
use super::model::{Notification, NotificationDraft};
use super::storage::Storage;
use super::user_key;
use crate::constants;

/// Time source, injectable for deterministic pruning.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Store shared between the dispatcher, the pruner and UI callers.
///
/// Every operation is synchronous and runs under the mutex, so mutations
/// are strictly ordered and never partially applied.
pub type SharedNotificationStore = Arc<Mutex<NotificationStore>>;

/// The signed-in user's notifications, newest first.
pub struct NotificationStore {
    storage: Arc<dyn Storage>,
    retention: chrono::Duration,
    clock: Clock,
    user: Option<String>,
    items: Vec<Notification>,
    unread: usize,
    unread_tx: watch::Sender<usize>,
    migrated: bool,
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStore")
            .field("user", &self.user)
            .field("items", &self.items.len())
            .field("unread", &self.unread)
            .finish_non_exhaustive()
    }
}

impl NotificationStore {
    /// Empty, signed-out store over `storage`.
    pub fn new(storage: Arc<dyn Storage>, retention: Duration) -> Self {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        Self {
            storage,
            retention,
            clock: Arc::new(Utc::now),
            user: None,
            items: Vec::new(),
            unread: 0,
            unread_tx: watch::channel(0).0,
            migrated: false,
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Wrap for sharing.
    pub fn shared(self) -> SharedNotificationStore {
        Arc::new(Mutex::new(self))
    }

    /// Signed-in owner, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Hydrate `user_id`'s namespace, replacing whatever was in memory.
    ///
    /// Runs the pending migration first (once per store), drops any entry
    /// not owned by `user_id`, then prunes.
    pub fn load(&mut self, user_id: &str) {
        if !self.migrated {
            if let Err(e) = migration::run(self.storage.as_ref(), user_id) {
                log::warn!("[Store] Notification migration failed: {}", e);
            }
            self.migrated = true;
        }

        self.user = Some(user_id.to_string());
        self.items = self.read_namespace(user_id);
        self.items
            .sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        log::info!(
            "[Store] Loaded {} notification(s) for {}",
            self.items.len(),
            user_id
        );

        if self.prune_expired() > 0 {
            self.persist();
        }
        self.recompute();
    }

    fn read_namespace(&self, user_id: &str) -> Vec<Notification> {
        let key = user_key(user_id);
        let raw = match self.storage.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("[Store] Cannot read {}: {}", key, e);
                return Vec::new();
            }
        };
        let entries: Vec<Notification> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[Store] Ignoring corrupt {}: {}", key, e);
                return Vec::new();
            }
        };

        let total = entries.len();
        let owned: Vec<Notification> = entries
            .into_iter()
            .filter(|n| n.owner_user_id() == user_id)
            .collect();
        if owned.len() != total {
            log::warn!(
                "[Store] Filtered {} entr(ies) not owned by {} out of {}",
                total - owned.len(),
                user_id,
                key
            );
        }
        owned
    }

    /// Identity change: discard memory, then hydrate `user_id` (or stay
    /// empty when signed out).
    pub fn switch_user(&mut self, user_id: Option<&str>) {
        if self.user.as_deref() == user_id {
            return;
        }
        self.items.clear();
        self.user = None;
        match user_id {
            Some(id) => self.load(id),
            None => {
                log::info!("[Store] Signed out; notifications cleared from memory");
                self.recompute();
            }
        }
    }

    /// Create a notification for the signed-in user.
    ///
    /// Without a signed-in user the draft is logged and dropped.
    pub fn add(&mut self, draft: NotificationDraft) -> Option<Notification> {
        let Some(owner) = self.user.clone() else {
            log::warn!(
                "[Store] Dropping {} notification '{}': no authenticated owner",
                draft.kind,
                draft.title
            );
            return None;
        };
        let notification = Notification::create(draft, &owner, (self.clock)());
        self.items.insert(0, notification.clone());
        self.recompute();
        self.persist();
        Some(notification)
    }

    /// Mark one notification read. Returns `true` if it changed.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let changed = self
            .items
            .iter_mut()
            .find(|n| n.id() == id)
            .is_some_and(Notification::mark_read);
        if changed {
            self.recompute();
            self.persist();
        }
        changed
    }

    /// Mark everything read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let changed = self
            .items
            .iter_mut()
            .map(Notification::mark_read)
            .filter(|changed| *changed)
            .count();
        if changed > 0 {
            self.recompute();
            self.persist();
        }
        changed
    }

    /// Drop read notifications older than the retention window. Returns how
    /// many were removed.
    pub fn prune(&mut self) -> usize {
        let removed = self.prune_expired();
        if removed > 0 {
            log::debug!("[Store] Pruned {} notification(s)", removed);
            self.recompute();
            self.persist();
        }
        removed
    }

    fn prune_expired(&mut self) -> usize {
        let now = (self.clock)();
        let before = self.items.len();
        let retention = self.retention;
        self.items.retain(|n| !n.is_expired(now, retention));
        before - self.items.len()
    }

    /// Delete `user_id`'s namespace and the legacy unscoped key.
    ///
    /// In-memory entries are emptied when they belong to `user_id` (or no one
    /// is signed in); another signed-in user's list is left alone.
    pub fn clear(&mut self, user_id: &str) {
        if self.user.as_deref().is_none_or(|u| u == user_id) {
            self.items.clear();
            self.recompute();
        }
        for key in [user_key(user_id), constants::LEGACY_NOTIFICATIONS_KEY.to_string()] {
            if let Err(e) = self.storage.remove(&key) {
                log::warn!("[Store] Cannot remove {}: {}", key, e);
            }
        }
        log::info!("[Store] Cleared notifications for {}", user_id);
    }

    /// Snapshot, newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.items.clone()
    }

    /// Look up one notification.
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id() == id)
    }

    /// Number of notifications.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count of unread notifications.
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    /// Observe the unread count.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    fn recompute(&mut self) {
        self.unread = self.items.iter().filter(|n| !n.is_read()).count();
        self.unread_tx.send_replace(self.unread);
    }

    /// Write the list through to the user's namespace. An empty list removes
    /// the key.
    fn persist(&self) {
        let Some(user) = self.user.as_deref() else {
            return;
        };
        let key = user_key(user);
        let result = if self.items.is_empty() {
            self.storage.remove(&key)
        } else {
            match serde_json::to_string(&self.items) {
                Ok(json) => self.storage.set(&key, &json),
                Err(e) => {
                    log::error!("[Store] Cannot serialize notifications: {}", e);
                    return;
                }
            }
        };
        if let Err(e) = result {
            log::warn!("[Store] Write-through to {} failed: {}", key, e);
        }
    }
}

/// Background pruner; stops when dropped.
#[derive(Debug)]
pub struct PrunerHandle {
    task: JoinHandle<()>,
}

impl Drop for PrunerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run [`NotificationStore::prune`] every `interval`.
pub fn spawn_pruner(store: SharedNotificationStore, interval: Duration) -> PrunerHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately; load() already pruned
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.lock().expect("notification store poisoned").prune();
        }
    });
    PrunerHandle { task }
}
