//! Subscription binding: stable listeners that call the latest handler.
//!
//! A binding registers exactly one raw listener per (subscriber, event). The
//! listener never changes; it reads the current handler out of a shared slot
//! on every invocation. Callers swap the slot whenever their state changes
//! (every tick, every render), so handlers always see fresh captures without
//! the transport seeing any listener churn.
//!
//! ```text
//!   transport ── listener (fixed) ──► slot.read() ──► latest handler
//!                                        ▲
//!                     update(handler) ───┘
//! ```
//!
//! Dropping a binding removes its listener. Nothing is left registered once
//! every binding of a subscriber is gone.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use serde_json::Value;

use crate::connection::{ConnectionManager, Listener, ListenerId};

/// Event handler held in a binding slot.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// One event subscription with a swappable handler.
pub struct EventBinding {
    manager: Weak<ConnectionManager>,
    event: String,
    id: ListenerId,
    slot: Arc<RwLock<Handler>>,
}

impl std::fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBinding")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl EventBinding {
    /// Register `handler` for `event`.
    ///
    /// If no transport exists yet one is initialized first; registration
    /// always completes.
    pub fn bind<F>(manager: &Arc<ConnectionManager>, event: &str, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if manager.transport().is_none() {
            log::warn!(
                "[Binding] '{}' bound before a transport exists; initializing one",
                event
            );
            manager.initialize();
        }

        let slot: Arc<RwLock<Handler>> = Arc::new(RwLock::new(Arc::new(handler)));
        let reader = Arc::clone(&slot);
        let listener: Listener = Arc::new(move |payload: &Value| {
            let current = Arc::clone(&*reader.read().expect("binding slot lock poisoned"));
            current(payload);
        });
        let id = manager.on(event, listener);

        Self {
            manager: Arc::downgrade(manager),
            event: event.to_string(),
            id,
            slot,
        }
    }

    /// Replace the handler. The underlying listener is untouched.
    pub fn update<F>(&self, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        *self.slot.write().expect("binding slot lock poisoned") = Arc::new(handler);
    }

    /// Event name.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Underlying listener id.
    pub fn listener_id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for EventBinding {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            if !manager.off(&self.event, self.id) {
                log::debug!("[Binding] Listener for '{}' was already gone", self.event);
            }
        }
    }
}

/// All bindings of one subscriber, at most one per event.
///
/// Calling [`Self::on`] again for an event already bound only refreshes the
/// handler.
#[derive(Debug)]
pub struct Subscriber {
    manager: Arc<ConnectionManager>,
    bindings: HashMap<String, EventBinding>,
}

impl Subscriber {
    /// Empty subscriber on `manager`.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            bindings: HashMap::new(),
        }
    }

    /// Bind or refresh the handler for `event`.
    pub fn on<F>(&mut self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if let Some(binding) = self.bindings.get(event) {
            binding.update(handler);
            return;
        }
        let binding = EventBinding::bind(&self.manager, event, handler);
        self.bindings.insert(event.to_string(), binding);
    }

    /// Remove the binding for `event`. Returns `false` if none existed.
    pub fn off(&mut self, event: &str) -> bool {
        self.bindings.remove(event).is_some()
    }

    /// Number of bound events.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{fast_options, wait_for, MemoryConnector};
    use crate::connection::LinkEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn manager() -> (
        Arc<ConnectionManager>,
        tokio::sync::mpsc::UnboundedReceiver<crate::connection::testing::RemoteEnd>,
    ) {
        let (connector, remotes) = MemoryConnector::new();
        (
            Arc::new(ConnectionManager::new(connector, fast_options())),
            remotes,
        )
    }

    #[test]
    fn test_bind_without_transport_initializes_one() {
        let (manager, _remotes) = manager();
        assert!(manager.transport().is_none());
        let binding = EventBinding::bind(&manager, "notification", |_| {});
        assert!(manager.transport().is_some());
        assert_eq!(manager.listeners().count_for("notification"), 1);
        drop(binding);
        assert_eq!(manager.listeners().count_for("notification"), 0);
    }

    #[test]
    fn test_update_keeps_single_listener() {
        let (manager, _remotes) = manager();
        let binding = EventBinding::bind(&manager, "new_bid", |_| {});
        let id = binding.listener_id();
        for _ in 0..10 {
            binding.update(|_| {});
        }
        assert_eq!(manager.listeners().count_for("new_bid"), 1);
        assert_eq!(binding.listener_id(), id);
    }

    #[test]
    fn test_listener_calls_latest_handler() {
        let (manager, _remotes) = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let binding = EventBinding::bind(&manager, "new_bid", move |_| {
            sink.lock().unwrap().push("first");
        });
        manager.listeners().dispatch("new_bid", &Value::Null);

        let sink = Arc::clone(&seen);
        binding.update(move |_| sink.lock().unwrap().push("second"));
        manager.listeners().dispatch("new_bid", &Value::Null);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_handler_may_replace_itself() {
        let (manager, _remotes) = manager();
        let holder: Arc<Mutex<Option<EventBinding>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let holder_in = Arc::clone(&holder);
        let hits_in = Arc::clone(&hits);
        let binding = EventBinding::bind(&manager, "tick", move |_| {
            hits_in.fetch_add(1, Ordering::SeqCst);
            if let Some(b) = holder_in.lock().unwrap().as_ref() {
                let hits_next = Arc::clone(&hits_in);
                b.update(move |_| {
                    hits_next.fetch_add(10, Ordering::SeqCst);
                });
            }
        });
        *holder.lock().unwrap() = Some(binding);

        manager.listeners().dispatch("tick", &Value::Null);
        manager.listeners().dispatch("tick", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_subscriber_refreshes_instead_of_rebinding() {
        let (manager, _remotes) = manager();
        let mut subscriber = Subscriber::new(Arc::clone(&manager));
        let total = Arc::new(AtomicUsize::new(0));

        for n in 1..=5 {
            let total = Arc::clone(&total);
            subscriber.on("auction:ended", move |_| {
                total.store(n, Ordering::SeqCst);
            });
        }
        assert_eq!(subscriber.len(), 1);
        assert_eq!(manager.listeners().count_for("auction:ended"), 1);

        manager.listeners().dispatch("auction:ended", &Value::Null);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_subscriber_teardown_leaves_no_listeners() {
        let (manager, _remotes) = manager();
        {
            let mut subscriber = Subscriber::new(Arc::clone(&manager));
            subscriber.on("notification", |_| {});
            subscriber.on("new_bid", |_| {});
            subscriber.on("auction:ended", |_| {});
            assert_eq!(manager.listeners().listener_count(), 3);
            assert!(subscriber.off("new_bid"));
            assert!(!subscriber.off("new_bid"));
            assert_eq!(manager.listeners().listener_count(), 2);
        }
        assert_eq!(manager.listeners().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_binding_survives_transport_replacement() {
        let (manager, mut remotes) = manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _binding = EventBinding::bind(&manager, "notification", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        let _first = remotes.recv().await.unwrap();
        manager.disconnect();
        manager.connect();
        let second = remotes.recv().await.unwrap();
        second
            .events
            .send(LinkEvent::Event {
                name: "notification".into(),
                payload: Value::Null,
            })
            .await
            .unwrap();

        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1).await);
    }
}
