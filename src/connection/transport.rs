//! The singleton push-channel transport and its driver task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{
    ConnectionOptions, ConnectionState, Connector, DisconnectReason, Link, LinkEvent,
    ListenerRegistry, OutboundFrame, CONNECT_ERROR_EVENT, CONNECT_EVENT, DISCONNECT_EVENT,
};
use crate::constants;
use crate::error::ConnectionError;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Inner {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    /// A driver task is running (connecting, connected or backing off).
    driving: bool,
}

/// One push-channel transport instance.
///
/// Created by [`super::ConnectionManager::initialize`]; discarded by
/// `disconnect()`, after which it never connects again.
#[derive(Debug)]
pub struct Transport {
    instance: u64,
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    listeners: Arc<ListenerRegistry>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl Transport {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
        listeners: Arc<ListenerRegistry>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            connector,
            options,
            listeners,
            state_tx,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Process-unique instance number, for logs.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Current state of this instance.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().expect("transport mutex poisoned").state
    }

    /// Start the driver unless one is already running.
    ///
    /// Returns `true` if a new connection cycle was started.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            log::warn!("[Socket] connect() on discarded transport #{}", self.instance);
            return false;
        }
        {
            let mut inner = self.inner.lock().expect("transport mutex poisoned");
            if inner.driving {
                log::debug!(
                    "[Socket] connect() ignored, transport #{} already {}",
                    self.instance,
                    inner.state
                );
                return false;
            }
            inner.driving = true;
        }
        tokio::spawn(Arc::clone(self).drive());
        true
    }

    /// Send an event if connected; otherwise log and drop it.
    pub fn emit(&self, event: &str, payload: Value) {
        let inner = self.inner.lock().expect("transport mutex poisoned");
        match (&inner.outbound, inner.state) {
            (Some(tx), ConnectionState::Connected) => {
                let frame = OutboundFrame::Event {
                    name: event.to_string(),
                    payload,
                };
                if tx.send(frame).is_err() {
                    log::warn!("[Socket] Dropping '{}': link already closed", event);
                } else {
                    log::trace!("[Socket] Emitted '{}'", event);
                }
            }
            (_, state) => {
                log::warn!("[Socket] Cannot emit '{}' while {}", event, state);
            }
        }
    }

    /// Stop the driver, close the link and fire `disconnect` if connected.
    pub(crate) fn shutdown(&self) {
        let (was_connected, outbound) = {
            let mut inner = self.inner.lock().expect("transport mutex poisoned");
            self.cancel.cancel();
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            (was_connected, inner.outbound.take())
        };
        if let Some(tx) = outbound {
            let _ = tx.send(OutboundFrame::Close);
        }
        if was_connected {
            self.listeners.dispatch(
                DISCONNECT_EVENT,
                &Value::String(DisconnectReason::ClientDisconnect.as_str().to_string()),
            );
        }
    }

    /// Publish `state` unless the transport was shut down. Cancellation is
    /// only observed under the `inner` lock so nothing lands after `shutdown`.
    fn set_state(&self, state: ConnectionState) -> bool {
        let mut inner = self.inner.lock().expect("transport mutex poisoned");
        if self.cancel.is_cancelled() {
            return false;
        }
        inner.state = state;
        self.state_tx.send_replace(state);
        true
    }

    /// Mark the driver finished, optionally with a terminal state, in one step
    /// so an immediate `connect()` after observing that state is honoured.
    fn finish(&self, state: Option<ConnectionState>) {
        let mut inner = self.inner.lock().expect("transport mutex poisoned");
        inner.driving = false;
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(state) = state {
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    async fn drive(self: Arc<Self>) {
        let mut retries: u32 = 0;
        let mut delay = self.options.reconnection_delay;

        let terminal = loop {
            if !self.set_state(ConnectionState::Connecting) {
                break None;
            }
            log::info!("[Socket] Transport #{} connecting", self.instance);

            let attempt = tokio::select! {
                () = self.cancel.cancelled() => break None,
                r = tokio::time::timeout(self.options.connect_timeout, self.connector.connect()) => r,
            };

            let error = match attempt {
                Ok(Ok(link)) => {
                    retries = 0;
                    delay = self.options.reconnection_delay;
                    let Some(reason) = self.run_link(link).await else {
                        break None;
                    };
                    // `shutdown` already reported the disconnect.
                    if !self.set_state(ConnectionState::Disconnected) {
                        break None;
                    }
                    log::warn!(
                        "[Socket] Transport #{} disconnected: {:?}",
                        self.instance,
                        reason
                    );
                    self.listeners.dispatch(
                        DISCONNECT_EVENT,
                        &Value::String(reason.as_str().to_string()),
                    );
                    if !reason.should_reconnect() {
                        break Some(ConnectionState::Disconnected);
                    }
                    if !self.backoff(&mut delay).await {
                        break None;
                    }
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_elapsed) => ConnectionError::Timeout(
                    u64::try_from(self.options.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                ),
            };

            if self.cancel.is_cancelled() {
                break None;
            }
            log::warn!(
                "[Socket] Handshake failed (attempt {}/{}): {}",
                retries + 1,
                self.options.reconnection_attempts + 1,
                error
            );
            self.listeners
                .dispatch(CONNECT_ERROR_EVENT, &Value::String(error.to_string()));

            if retries >= self.options.reconnection_attempts {
                log::error!(
                    "[Socket] Giving up after {} attempts; reconnect must be requested explicitly",
                    retries + 1
                );
                break Some(ConnectionState::Error);
            }
            retries += 1;
            if !self.backoff(&mut delay).await {
                break None;
            }
        };

        self.finish(terminal);
    }

    /// Pump one live link. Returns `None` if the transport was cancelled.
    async fn run_link(&self, link: Link) -> Option<DisconnectReason> {
        {
            let mut inner = self.inner.lock().expect("transport mutex poisoned");
            if self.cancel.is_cancelled() {
                let _ = link.outbound.send(OutboundFrame::Close);
                return None;
            }
            inner.outbound = Some(link.outbound);
            inner.state = ConnectionState::Connected;
            self.state_tx.send_replace(ConnectionState::Connected);
        }
        log::info!("[Socket] Transport #{} connected", self.instance);
        self.listeners.dispatch(CONNECT_EVENT, &Value::Null);

        let mut inbound = link.inbound;
        let reason = loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => return None,
                event = inbound.recv() => event,
            };
            match event {
                Some(LinkEvent::Event { name, payload }) => {
                    if is_reserved(&name) {
                        log::warn!("[Socket] Ignoring server event with reserved name '{}'", name);
                        continue;
                    }
                    let delivered = self.listeners.dispatch(&name, &payload);
                    log::trace!("[Socket] '{}' delivered to {} listener(s)", name, delivered);
                }
                Some(LinkEvent::Closed(reason)) => break reason,
                None => break DisconnectReason::TransportClose,
            }
        };

        self.inner
            .lock()
            .expect("transport mutex poisoned")
            .outbound = None;
        Some(reason)
    }

    /// Sleep for the current delay, doubling it. Returns `false` if cancelled.
    async fn backoff(&self, delay: &mut Duration) -> bool {
        let wait = *delay;
        *delay = (*delay * 2).min(constants::MAX_RECONNECTION_DELAY);
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(wait) => true,
        }
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, CONNECT_EVENT | DISCONNECT_EVENT | CONNECT_ERROR_EVENT)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fast_options, wait_for, MemoryConnector};
    use super::*;

    fn transport(connector: Arc<MemoryConnector>) -> Arc<Transport> {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Arc::new(Transport::new(
            connector,
            fast_options(),
            Arc::new(ListenerRegistry::new()),
            Arc::new(state_tx),
        ))
    }

    #[tokio::test]
    async fn test_connect_reports_whether_cycle_started() {
        let (connector, mut remotes) = MemoryConnector::new();
        let t = transport(connector);
        assert!(t.connect());
        assert!(!t.connect());
        let _remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| t.state() == ConnectionState::Connected).await);
        assert!(!t.connect());
    }

    #[tokio::test]
    async fn test_discarded_transport_never_reconnects() {
        let (connector, _remotes) = MemoryConnector::new();
        let t = transport(Arc::clone(&connector));
        t.shutdown();
        assert!(!t.connect());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.handshakes(), 0);
    }

    #[tokio::test]
    async fn test_reserved_event_names_from_server_are_ignored() {
        let (connector, mut remotes) = MemoryConnector::new();
        let t = transport(connector);
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        t.listeners.register(
            CONNECT_EVENT,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        t.connect();
        let remote = remotes.recv().await.unwrap();
        remote
            .events
            .send(LinkEvent::Event {
                name: CONNECT_EVENT.into(),
                payload: Value::Null,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn count_disconnects(t: &Transport) -> Arc<std::sync::atomic::AtomicUsize> {
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        t.listeners.register(
            DISCONNECT_EVENT,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hits
    }

    #[tokio::test]
    async fn test_state_writes_after_shutdown_are_dropped() {
        let (connector, _remotes) = MemoryConnector::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let t = Arc::new(Transport::new(
            connector,
            fast_options(),
            Arc::new(ListenerRegistry::new()),
            Arc::new(state_tx),
        ));

        t.shutdown();
        assert!(!t.set_state(ConnectionState::Connecting));
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert!(!state_rx.has_changed().unwrap());
        assert_eq!(*state_rx.borrow(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_while_connected_fires_one_disconnect() {
        let (connector, mut remotes) = MemoryConnector::new();
        let t = transport(connector);
        let hits = count_disconnects(&t);
        t.connect();
        let remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| t.state() == ConnectionState::Connected).await);

        t.shutdown();
        let _ = remote
            .events
            .send(LinkEvent::Closed(DisconnectReason::TransportClose))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_after_server_disconnect_adds_no_event() {
        let (connector, mut remotes) = MemoryConnector::new();
        let t = transport(connector);
        let hits = count_disconnects(&t);
        t.connect();
        let remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| t.state() == ConnectionState::Connected).await);

        remote
            .events
            .send(LinkEvent::Closed(DisconnectReason::ServerDisconnect))
            .await
            .unwrap();
        assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1).await);
        assert!(wait_for(|| t.state() == ConnectionState::Disconnected).await);

        t.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_instances_are_unique() {
        let (connector, _remotes) = MemoryConnector::new();
        let a = transport(Arc::clone(&connector));
        let b = transport(connector);
        assert_ne!(a.instance(), b.instance());
    }
}
