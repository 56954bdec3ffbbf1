//! Wiring of every component for one process.
//!
//! ```text
//!   IdentityMonitor ──► SessionState ──(watch)──► identity follower
//!                            ▲                       │ store.clear + switch_user
//!   AuthenticatedClient ──► SessionGuard (purge)     │ manager reconnect
//!                                                    ▼
//!   ConnectionManager ──► Subscriber ──► Dispatcher ──► NotificationStore
//! ```
//!
//! An identity change (sign-in, account switch, logout) deletes the previous
//! owner's persisted notifications, loads the store for the new owner and
//! rebuilds the push channel so the server binds the socket to the new
//! session.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::api::{ApiClient, AuthenticatedClient};
use crate::binding::Subscriber;
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionOptions, Connector, SocketIoConnector};
use crate::dispatcher::{AlertSink, Dispatcher};
use crate::navigation::Navigator;
use crate::notifications::{
    spawn_pruner, FileStorage, NotificationStore, PrunerHandle, SharedNotificationStore, Storage,
};
use crate::session::{
    spawn_identity_monitor, Identity, IdentityMonitor, IdentitySource, LogoutClient, RouteRules,
    SessionGuard, SessionState,
};

/// Replaceable collaborators of a [`BidwatchClient`].
#[derive(Debug, Clone)]
pub struct ClientParts {
    /// Push-channel handshake.
    pub connector: Arc<dyn Connector>,
    /// Notification persistence.
    pub storage: Arc<dyn Storage>,
    /// Identity endpoint.
    pub identity_source: Arc<dyn IdentitySource>,
    /// Logout endpoint.
    pub logout_client: Arc<dyn LogoutClient>,
    /// Alert surface.
    pub alerts: Arc<dyn AlertSink>,
    /// Router.
    pub navigator: Arc<dyn Navigator>,
}

/// Background tasks of a started client.
#[derive(Debug, Default)]
struct Running {
    subscriber: Option<Subscriber>,
    pruner: Option<PrunerHandle>,
    monitor: Option<IdentityMonitor>,
    follower: Option<JoinHandle<()>>,
}

/// Every component, wired.
#[derive(Debug)]
pub struct BidwatchClient {
    config: Config,
    manager: Arc<ConnectionManager>,
    store: SharedNotificationStore,
    dispatcher: Arc<Dispatcher>,
    session: Arc<SessionState>,
    rules: Arc<RouteRules>,
    guard: Arc<SessionGuard>,
    identity_source: Arc<dyn IdentitySource>,
    navigator: Arc<dyn Navigator>,
    running: Mutex<Running>,
}

impl BidwatchClient {
    /// Production wiring: Socket.IO, file storage, HTTP session endpoints.
    pub fn from_config(
        config: Config,
        alerts: Arc<dyn AlertSink>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let api = Arc::new(ApiClient::from_config(&config).context("Failed to build HTTP client")?);
        let storage = FileStorage::new(Config::storage_dir()?)
            .context("Failed to open notification storage")?;
        let parts = ClientParts {
            connector: Arc::new(SocketIoConnector::from_config(&config)),
            storage: Arc::new(storage),
            identity_source: Arc::clone(&api) as Arc<dyn IdentitySource>,
            logout_client: api,
            alerts,
            navigator,
        };
        Ok(Self::with_parts(config, parts))
    }

    /// Wire explicit collaborators.
    pub fn with_parts(config: Config, parts: ClientParts) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            parts.connector,
            ConnectionOptions::from(&config),
        ));
        let store = NotificationStore::new(parts.storage, config.retention()).shared();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            parts.alerts,
            Arc::clone(&parts.navigator),
        ));
        let session = Arc::new(SessionState::new(config.exempt_session));
        let rules = Arc::new(RouteRules::from_config(&config));
        let guard = Arc::new(SessionGuard::new(
            Arc::clone(&session),
            Arc::clone(&rules),
            parts.logout_client,
            Arc::clone(&parts.navigator),
            config.login_route.clone(),
            config.redirect_window(),
        ));

        Self {
            config,
            manager,
            store,
            dispatcher,
            session,
            rules,
            guard,
            identity_source: parts.identity_source,
            navigator: parts.navigator,
            running: Mutex::new(Running::default()),
        }
    }

    /// Bind the dispatcher, start the pruner, follow identity changes and
    /// start the periodic identity check. Calling it twice does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock().expect("client state poisoned");
        if running.follower.is_some() {
            log::debug!("[Client] Already started");
            return;
        }

        running.subscriber = Some(self.dispatcher.attach(Arc::clone(&self.manager)));
        running.pruner = Some(spawn_pruner(
            Arc::clone(&self.store),
            self.config.prune_interval(),
        ));
        running.follower = Some(self.spawn_identity_follower());
        running.monitor = Some(spawn_identity_monitor(
            Arc::clone(&self.identity_source),
            Arc::clone(&self.session),
            Arc::clone(&self.rules),
            Arc::clone(&self.navigator),
            self.config.login_route.clone(),
            self.config.identity_check_interval(),
        ));
        log::info!("[Client] Started");
    }

    fn spawn_identity_follower(&self) -> JoinHandle<()> {
        let mut identity_rx = self.session.watch();
        let store = Arc::clone(&self.store);
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            let initial = identity_rx.borrow_and_update().clone();
            apply_identity(&store, &manager, initial.as_ref());
            while identity_rx.changed().await.is_ok() {
                let identity = identity_rx.borrow_and_update().clone();
                apply_identity(&store, &manager, identity.as_ref());
            }
        })
    }

    /// Stop background work and close the push channel.
    pub fn shutdown(&self) {
        let running = std::mem::take(&mut *self.running.lock().expect("client state poisoned"));
        if let Some(follower) = running.follower {
            follower.abort();
        }
        drop(running.monitor);
        drop(running.pruner);
        drop(running.subscriber);
        self.manager.disconnect();
        log::info!("[Client] Stopped");
    }

    /// Connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Notification store.
    pub fn store(&self) -> &SharedNotificationStore {
        &self.store
    }

    /// Dispatcher (alert activation, live updates).
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Cached session.
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// 401 guard.
    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    /// Authenticated REST client bound to this client's guard.
    pub fn authenticated(&self, api: Arc<ApiClient>) -> AuthenticatedClient {
        AuthenticatedClient::new(api, Arc::clone(&self.guard), Arc::clone(&self.navigator))
    }
}

impl Drop for BidwatchClient {
    fn drop(&mut self) {
        if let Ok(running) = self.running.get_mut() {
            if let Some(follower) = running.follower.take() {
                follower.abort();
            }
        }
    }
}

fn apply_identity(
    store: &SharedNotificationStore,
    manager: &ConnectionManager,
    identity: Option<&Identity>,
) {
    let user = identity.map(|i| i.id.as_str());
    {
        let mut store = store.lock().expect("notification store poisoned");
        // Sign-out and account switch destroy the previous user's namespace.
        let previous = store.user().filter(|prev| Some(*prev) != user).map(str::to_string);
        if let Some(previous) = previous {
            store.clear(&previous);
        }
        store.switch_user(user);
    }

    manager.disconnect();
    match user {
        Some(id) => {
            log::info!("[Client] Identity is {}; connecting push channel", id);
            manager.connect();
        }
        None => log::info!("[Client] Signed out; push channel closed"),
    }
}
