//! Push-channel connection management.
//!
//! One [`ConnectionManager`] owns at most one live [`Transport`] at a time.
//! The transport runs a background driver that performs the handshake
//! through a [`Connector`], pumps inbound events into the shared
//! [`ListenerRegistry`], and retries a bounded number of times before
//! settling into [`ConnectionState::Error`].
//!
//! ```text
//!   ConnectionManager ──initialize()──► Transport (singleton)
//!         │                                 │ driver task
//!         │ on()/off()                      │   connect ─► Connector ─► Link
//!         ▼                                 │   pump inbound ─► dispatch
//!   ListenerRegistry ◄──────────────────────┘   retry ×N, then Error
//! ```
//!
//! Lifecycle is observable only through the `connect`, `disconnect` and
//! `connect_error` listener events and the [`ConnectionManager::watch_state`]
//! channel. Nothing here returns an error to the caller.

pub mod listeners;
pub mod packet;
pub mod socketio;
pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::constants;
use crate::error::ConnectionError;

pub use listeners::{Listener, ListenerId, ListenerRegistry};
pub use socketio::SocketIoConnector;
pub use transport::Transport;

/// Listener event fired after every successful handshake.
pub const CONNECT_EVENT: &str = "connect";
/// Listener event fired when a live link is lost or torn down. Payload: reason.
pub const DISCONNECT_EVENT: &str = "disconnect";
/// Listener event fired for every failed handshake. Payload: error message.
pub const CONNECT_ERROR_EVENT: &str = "connect_error";

/// Connection lifecycle as shown by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport exists.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Link established.
    Connected,
    /// Link lost; a bounded reconnection cycle may be running.
    Disconnected,
    /// Reconnection attempts exhausted. Requires an explicit `connect()`.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a live link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server disconnected the namespace. Not retried automatically.
    ServerDisconnect,
    /// The client called `disconnect()`.
    ClientDisconnect,
    /// The underlying connection closed.
    TransportClose,
    /// The underlying connection failed.
    TransportError(String),
    /// No frame within `pingInterval + pingTimeout`.
    PingTimeout,
}

impl DisconnectReason {
    /// Reason string passed to `disconnect` listeners.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerDisconnect => "io server disconnect",
            Self::ClientDisconnect => "io client disconnect",
            Self::TransportClose => "transport close",
            Self::TransportError(_) => "transport error",
            Self::PingTimeout => "ping timeout",
        }
    }

    /// Whether the driver should start a reconnection cycle.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::ServerDisconnect | Self::ClientDisconnect)
    }
}

/// Event travelling from a live link to its transport.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Named server event.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },
    /// The link is gone; no further events follow.
    Closed(DisconnectReason),
}

/// Frame travelling from a transport to its live link.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Named client event.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        payload: Value,
    },
    /// Close the link gracefully.
    Close,
}

/// A handshaken connection. Dropping `outbound` also closes it.
#[derive(Debug)]
pub struct Link {
    /// Frames to send.
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Events received.
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Performs one handshake.
///
/// Authentication is the connector's business (ambient session cookie);
/// callers never pass credentials in event payloads.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Open a link. Called once per attempt; the transport applies the
    /// connection timeout around it.
    async fn connect(&self) -> Result<Link, ConnectionError>;
}

/// Retry and timeout policy of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Retries after a failed attempt before settling into `Error`.
    pub reconnection_attempts: u32,
    /// Upper bound for one handshake.
    pub connect_timeout: Duration,
    /// First retry delay; doubles up to [`constants::MAX_RECONNECTION_DELAY`].
    pub reconnection_delay: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnection_attempts: constants::RECONNECTION_ATTEMPTS,
            connect_timeout: constants::CONNECT_TIMEOUT,
            reconnection_delay: constants::RECONNECTION_DELAY,
        }
    }
}

impl From<&Config> for ConnectionOptions {
    fn from(config: &Config) -> Self {
        Self {
            reconnection_attempts: config.reconnection_attempts,
            connect_timeout: config.connect_timeout(),
            reconnection_delay: config.reconnection_delay(),
        }
    }
}

/// Owner of the single push-channel transport.
///
/// Explicit object rather than module state: tests build one per case with
/// an in-memory [`Connector`].
#[derive(Debug)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    listeners: Arc<ListenerRegistry>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    transport: Mutex<Option<Arc<Transport>>>,
}

impl ConnectionManager {
    /// Create a manager. No transport exists until [`Self::initialize`].
    pub fn new(connector: Arc<dyn Connector>, options: ConnectionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            connector,
            options,
            listeners: Arc::new(ListenerRegistry::new()),
            state_tx: Arc::new(state_tx),
            transport: Mutex::new(None),
        }
    }

    /// Manager speaking Socket.IO to the configured server.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(SocketIoConnector::from_config(config)),
            ConnectionOptions::from(config),
        )
    }

    /// Return the live transport, creating it if none exists.
    pub fn initialize(&self) -> Arc<Transport> {
        let mut slot = self.transport.lock().expect("transport slot mutex poisoned");
        if let Some(existing) = slot.as_ref() {
            return Arc::clone(existing);
        }
        let transport = Arc::new(Transport::new(
            Arc::clone(&self.connector),
            self.options,
            Arc::clone(&self.listeners),
            Arc::clone(&self.state_tx),
        ));
        log::info!("[Socket] Created transport #{}", transport.instance());
        *slot = Some(Arc::clone(&transport));
        transport
    }

    /// The live transport, if any.
    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport
            .lock()
            .expect("transport slot mutex poisoned")
            .clone()
    }

    /// Start connecting. Idempotent while connecting or connected.
    pub fn connect(&self) {
        self.initialize().connect();
    }

    /// Tear down and discard the transport.
    pub fn disconnect(&self) {
        let taken = self
            .transport
            .lock()
            .expect("transport slot mutex poisoned")
            .take();
        match taken {
            Some(transport) => {
                log::info!("[Socket] Disconnecting transport #{}", transport.instance());
                transport.shutdown();
                self.state_tx.send_replace(ConnectionState::Idle);
            }
            None => log::debug!("[Socket] disconnect() with no transport"),
        }
    }

    /// Send an event. Logs and drops it unless connected.
    pub fn emit(&self, event: &str, payload: Value) {
        match self.transport() {
            Some(transport) => transport.emit(event, payload),
            None => log::warn!("[Socket] Cannot emit '{}': no transport", event),
        }
    }

    /// Attach a raw listener.
    pub fn on(&self, event: &str, listener: Listener) -> ListenerId {
        self.listeners.register(event, listener)
    }

    /// Detach a raw listener.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.unregister(event, id)
    }

    /// Current state; `Idle` when no transport exists.
    pub fn state(&self) -> ConnectionState {
        self.transport()
            .map_or(ConnectionState::Idle, |t| t.state())
    }

    /// Observe state changes (status indicator).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Whether the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Shared listener registry.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.transport.lock() {
            if let Some(transport) = slot.take() {
                transport.shutdown();
            }
        }
    }
}

/// In-memory connector for tests: each handshake yields a link whose far
/// end is handed to the test through a channel.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Far end of an in-memory link.
    #[derive(Debug)]
    pub struct RemoteEnd {
        pub events: mpsc::Sender<LinkEvent>,
        pub sent: mpsc::UnboundedReceiver<OutboundFrame>,
    }

    #[derive(Debug)]
    pub struct MemoryConnector {
        pub handshakes: AtomicUsize,
        pub fail: std::sync::atomic::AtomicBool,
        remotes: mpsc::UnboundedSender<RemoteEnd>,
    }

    impl MemoryConnector {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    handshakes: AtomicUsize::new(0),
                    fail: std::sync::atomic::AtomicBool::new(false),
                    remotes: tx,
                }),
                rx,
            )
        }

        pub fn handshakes(&self) -> usize {
            self.handshakes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Link, ConnectionError> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConnectionError::Transport("connection refused".into()));
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::channel(16);
            let _ = self.remotes.send(RemoteEnd {
                events: in_tx,
                sent: out_rx,
            });
            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    pub fn fast_options() -> ConnectionOptions {
        ConnectionOptions {
            reconnection_attempts: 3,
            connect_timeout: Duration::from_millis(200),
            reconnection_delay: Duration::from_millis(5),
        }
    }

    /// Poll until `cond` holds or a second passes.
    pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_initialize_returns_existing_transport() {
        let (connector, _remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(connector, fast_options());
        let a = manager.initialize();
        let b = manager.initialize();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state(), ConnectionState::Idle);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_twice_yields_single_handshake_and_connect_event() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_options());
        let connects = Arc::new(AtomicUsize::new(0));
        manager.on(CONNECT_EVENT, counter_listener(&connects));

        manager.connect();
        manager.connect();
        let _remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);
        manager.connect();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(connector.handshakes(), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_nulls_transport_and_fires_disconnect() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(connector, fast_options());
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        manager.on(
            DISCONNECT_EVENT,
            Arc::new(move |v: &Value| sink.lock().unwrap().push(v.clone())),
        );

        manager.connect();
        let mut remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);

        manager.disconnect();
        assert!(manager.transport().is_none());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(*manager.watch_state().borrow(), ConnectionState::Idle);
        assert_eq!(remote.sent.recv().await, Some(OutboundFrame::Close));
        assert_eq!(
            reasons.lock().unwrap().as_slice(),
            &[Value::String("io client disconnect".into())]
        );
    }

    #[tokio::test]
    async fn test_emit_without_connection_is_noop() {
        let (connector, _remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(connector, fast_options());
        manager.emit("join_auction", serde_json::json!({"auctionId": "a1"}));
        manager.initialize();
        manager.emit("join_auction", serde_json::json!({"auctionId": "a1"}));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_emit_when_connected_reaches_link() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(connector, fast_options());
        manager.connect();
        let mut remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);

        manager.emit("join_auction", serde_json::json!({"auctionId": "a1"}));
        assert_eq!(
            remote.sent.recv().await,
            Some(OutboundFrame::Event {
                name: "join_auction".into(),
                payload: serde_json::json!({"auctionId": "a1"}),
            })
        );
    }

    #[tokio::test]
    async fn test_inbound_events_reach_listeners() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager = ConnectionManager::new(connector, fast_options());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on(
            "new_bid",
            Arc::new(move |v: &Value| sink.lock().unwrap().push(v.clone())),
        );
        manager.connect();
        let remote = remotes.recv().await.unwrap();
        remote
            .events
            .send(LinkEvent::Event {
                name: "new_bid".into(),
                payload: serde_json::json!({"auctionId": "a1"}),
            })
            .await
            .unwrap();

        assert!(wait_for(|| seen.lock().unwrap().len() == 1).await);
        assert_eq!(seen.lock().unwrap()[0]["auctionId"], "a1");
    }

    #[tokio::test]
    async fn test_exhausted_attempts_settle_into_error() {
        let (connector, _remotes) = MemoryConnector::new();
        connector.fail.store(true, Ordering::SeqCst);
        let manager =
            ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_options());
        let errors = Arc::new(AtomicUsize::new(0));
        manager.on(CONNECT_ERROR_EVENT, counter_listener(&errors));

        manager.connect();
        assert!(wait_for(|| manager.state() == ConnectionState::Error).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // one attempt plus three retries, then nothing more
        assert_eq!(connector.handshakes(), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_explicit_connect_after_error_starts_new_cycle() {
        let (connector, mut remotes) = MemoryConnector::new();
        connector.fail.store(true, Ordering::SeqCst);
        let manager =
            ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_options());
        manager.connect();
        assert!(wait_for(|| manager.state() == ConnectionState::Error).await);

        connector.fail.store(false, Ordering::SeqCst);
        manager.connect();
        let _remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);
        assert_eq!(connector.handshakes(), 5);
    }

    #[tokio::test]
    async fn test_lost_link_reconnects() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager =
            ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_options());
        let connects = Arc::new(AtomicUsize::new(0));
        manager.on(CONNECT_EVENT, counter_listener(&connects));
        manager.connect();

        let remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);
        remote
            .events
            .send(LinkEvent::Closed(DisconnectReason::TransportClose))
            .await
            .unwrap();

        let _second = remotes.recv().await.unwrap();
        assert!(wait_for(|| connects.load(Ordering::SeqCst) == 2).await);
        assert_eq!(connector.handshakes(), 2);
    }

    #[tokio::test]
    async fn test_server_disconnect_is_not_retried() {
        let (connector, mut remotes) = MemoryConnector::new();
        let manager =
            ConnectionManager::new(Arc::clone(&connector) as Arc<dyn Connector>, fast_options());
        manager.connect();
        let remote = remotes.recv().await.unwrap();
        assert!(wait_for(|| manager.is_connected()).await);

        remote
            .events
            .send(LinkEvent::Closed(DisconnectReason::ServerDisconnect))
            .await
            .unwrap();
        assert!(wait_for(|| manager.state() == ConnectionState::Disconnected).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.handshakes(), 1);
    }

    #[test]
    fn test_disconnect_reason_strings() {
        assert_eq!(DisconnectReason::PingTimeout.as_str(), "ping timeout");
        assert!(DisconnectReason::TransportClose.should_reconnect());
        assert!(!DisconnectReason::ServerDisconnect.should_reconnect());
    }
}
