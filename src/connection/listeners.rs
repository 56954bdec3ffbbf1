//! Raw event listener registry shared by every transport instance.
//!
//! Listeners are keyed by event name. Each registration gets a
//! [`ListenerId`] that removes exactly that registration. The registry
//! outlives individual transports so a reconnect after `disconnect()` does
//! not silently drop registrations that are still owned by live bindings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Raw listener invoked with the event payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifier of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

/// Thread-safe registry of raw listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Registry>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("total_listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener for `event`.
    pub fn register(&self, event: &str, listener: Listener) -> ListenerId {
        let mut inner = self.inner.lock().expect("listener registry mutex poisoned");
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        log::debug!("[Socket] Registered listener {:?} for '{}'", id, event);
        id
    }

    /// Detach one listener. Returns `false` if it was not registered.
    pub fn unregister(&self, event: &str, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().expect("listener registry mutex poisoned");
        let Some(list) = inner.listeners.get_mut(event) else {
            return false;
        };
        let Some(idx) = list.iter().position(|(lid, _)| *lid == id) else {
            return false;
        };
        list.remove(idx);
        if list.is_empty() {
            inner.listeners.remove(event);
        }
        log::debug!("[Socket] Unregistered listener {:?} for '{}'", id, event);
        true
    }

    /// Invoke every listener of `event` with `payload`.
    ///
    /// The list is snapshotted first, so listeners may register or
    /// unregister without deadlocking. Returns how many listeners ran.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let snapshot: Vec<Listener> = {
            let inner = self.inner.lock().expect("listener registry mutex poisoned");
            inner
                .listeners
                .get(event)
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };
        for listener in &snapshot {
            listener(payload);
        }
        snapshot.len()
    }

    /// Number of listeners attached to `event`.
    #[must_use]
    pub fn count_for(&self, event: &str) -> usize {
        let inner = self.inner.lock().expect("listener registry mutex poisoned");
        inner.listeners.get(event).map_or(0, Vec::len)
    }

    /// Total listeners across all events.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let inner = self.inner.lock().expect("listener registry mutex poisoned");
        inner.listeners.values().map(Vec::len).sum()
    }

    /// Names of all events with at least one listener.
    #[must_use]
    pub fn registered_events(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("listener registry mutex poisoned");
        inner.listeners.keys().cloned().collect()
    }
}
