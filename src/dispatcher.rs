//! Inbound push events → notification store, UI alerts and live updates.
//!
//! ```text
//!   "notification"  ──► private message? ── yes ──► ignored
//!                              │ no
//!                              ▼
//!                      NotificationStore::add ──► AlertSink::show
//!
//!   "new_bid" / "auction:ended" ──► broadcast<LiveUpdate>   (never stored)
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::binding::Subscriber;
use crate::connection::ConnectionManager;
use crate::constants;
use crate::lenient::{optional_id, required_id};
use crate::navigation::{auction_route, Navigator};
use crate::notifications::{Notification, NotificationDraft, NotificationKind, SharedNotificationStore};

/// Server event carrying a user-facing notification.
pub const NOTIFICATION_EVENT: &str = "notification";
/// Server event announcing a bid on a watched auction.
pub const NEW_BID_EVENT: &str = "new_bid";
/// Server event announcing the end of an auction.
pub const AUCTION_ENDED_EVENT: &str = "auction:ended";

/// `type` tags that belong to the messaging surface.
const PRIVATE_MESSAGE_TYPES: [&str; 3] = ["MESSAGE", "NEW_MESSAGE", "PRIVATE_MESSAGE"];

/// Body of a `notification` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPayload {
    /// Raw kind tag.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Headline.
    #[serde(default)]
    pub title: Option<String>,
    /// Body.
    #[serde(default)]
    pub message: Option<String>,
    /// Nested extras.
    #[serde(default)]
    pub data: Option<NotificationData>,
    /// Top-level auction id (older servers).
    #[serde(default, deserialize_with = "optional_id")]
    pub auction_id: Option<String>,
}

/// `data` object of a `notification` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationData {
    /// Related auction.
    #[serde(default, deserialize_with = "optional_id")]
    pub auction_id: Option<String>,
    /// Present on private-message notifications.
    #[serde(default)]
    pub conversation_id: Option<Value>,
}

impl NotificationPayload {
    /// `data.auction_id`, else `auction_id`, else empty.
    pub fn resolved_auction_id(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.auction_id.clone())
            .or_else(|| self.auction_id.clone())
            .unwrap_or_default()
    }

    /// Whether this belongs to the messaging surface.
    pub fn is_private_message(&self) -> bool {
        let tagged = self.kind.as_deref().is_some_and(|kind| {
            PRIVATE_MESSAGE_TYPES
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind.trim()))
        });
        let conversation = self
            .data
            .as_ref()
            .is_some_and(|d| d.conversation_id.as_ref().is_some_and(|c| !c.is_null()));
        tagged || conversation
    }
}

/// Bidder shown in a live bid update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bidder {
    /// User id.
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// One bid in a live bid update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidInfo {
    /// Bid id.
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    /// Amount as formatted by the server.
    #[serde(deserialize_with = "required_id")]
    pub amount: String,
    /// Who placed it.
    pub user: Bidder,
}

/// Body of a `new_bid` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBid {
    /// Auction that received the bid.
    #[serde(deserialize_with = "required_id")]
    pub auction_id: String,
    /// The bid.
    pub bid: BidInfo,
}

/// Body of an `auction:ended` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionEnded {
    /// Auction that ended.
    #[serde(deserialize_with = "required_id")]
    pub auction_id: String,
    /// Winner, when there was one.
    #[serde(default, deserialize_with = "optional_id")]
    pub winner_id: Option<String>,
    /// Winner's display name.
    #[serde(default)]
    pub winner_name: Option<String>,
    /// Hammer price.
    #[serde(default, deserialize_with = "optional_id")]
    pub final_amount: Option<String>,
}

/// Live-refresh update for auction pages. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdate {
    /// A new bid was placed.
    NewBid(NewBid),
    /// An auction ended.
    AuctionEnded(AuctionEnded),
}

impl LiveUpdate {
    /// Auction the update refers to.
    pub fn auction_id(&self) -> &str {
        match self {
            Self::NewBid(b) => &b.auction_id,
            Self::AuctionEnded(e) => &e.auction_id,
        }
    }
}

/// Transient, dismissable UI alert for a freshly stored notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Stored notification this alert is about.
    pub notification_id: String,
    /// Kind.
    pub kind: NotificationKind,
    /// Headline.
    pub title: String,
    /// Body.
    pub message: String,
    /// Related auction, empty when none.
    pub auction_id: String,
}

impl From<&Notification> for Alert {
    fn from(n: &Notification) -> Self {
        Self {
            notification_id: n.id().to_string(),
            kind: n.kind().clone(),
            title: n.title().to_string(),
            message: n.message().to_string(),
            auction_id: n.auction_id().to_string(),
        }
    }
}

/// Where alerts are shown.
pub trait AlertSink: Send + Sync + std::fmt::Debug {
    /// Present `alert`. Its primary action is [`Dispatcher::activate`].
    fn show(&self, alert: &Alert);
}

/// Alert sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn show(&self, alert: &Alert) {
        log::info!("[Alert] {} - {}: {}", alert.kind, alert.title, alert.message);
    }
}

/// Normalizes push events into the store and the UI.
#[derive(Debug)]
pub struct Dispatcher {
    store: SharedNotificationStore,
    alerts: Arc<dyn AlertSink>,
    navigator: Arc<dyn Navigator>,
    live_tx: broadcast::Sender<LiveUpdate>,
}

impl Dispatcher {
    /// Dispatcher feeding `store`.
    pub fn new(
        store: SharedNotificationStore,
        alerts: Arc<dyn AlertSink>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let (live_tx, _) = broadcast::channel(constants::LIVE_UPDATE_CAPACITY);
        Self {
            store,
            alerts,
            navigator,
            live_tx,
        }
    }

    /// Bind the three push events on `manager`. Dropping the returned
    /// subscriber unbinds them.
    pub fn attach(self: &Arc<Self>, manager: Arc<ConnectionManager>) -> Subscriber {
        let mut subscriber = Subscriber::new(manager);

        let this = Arc::clone(self);
        subscriber.on(NOTIFICATION_EVENT, move |payload| {
            this.handle_notification(payload);
        });
        let this = Arc::clone(self);
        subscriber.on(NEW_BID_EVENT, move |payload| this.handle_new_bid(payload));
        let this = Arc::clone(self);
        subscriber.on(AUCTION_ENDED_EVENT, move |payload| {
            this.handle_auction_ended(payload);
        });

        subscriber
    }

    /// Receive live updates.
    pub fn subscribe_live(&self) -> broadcast::Receiver<LiveUpdate> {
        self.live_tx.subscribe()
    }

    /// Handle a `notification` event. Returns the stored notification, if
    /// one was created.
    pub fn handle_notification(&self, payload: &Value) -> Option<Notification> {
        let parsed = match NotificationPayload::deserialize(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("[Dispatcher] Malformed notification payload: {}", e);
                return None;
            }
        };

        if parsed.is_private_message() {
            log::debug!("[Dispatcher] Skipping private message notification");
            return None;
        }

        let kind = NotificationKind::parse(parsed.kind.as_deref());
        if kind.is_unknown() {
            log::warn!(
                "[Dispatcher] Unrecognized notification type {:?}; storing as unknown",
                parsed.kind
            );
        }

        let auction_id = parsed.resolved_auction_id();
        let title = parsed
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| kind.fallback_title().to_string());
        let draft = NotificationDraft {
            kind,
            title,
            message: parsed.message.unwrap_or_default(),
            auction_id,
        };

        let stored = self
            .store
            .lock()
            .expect("notification store poisoned")
            .add(draft)?;
        log::info!(
            "[Dispatcher] {} notification for auction '{}'",
            stored.kind(),
            stored.auction_id()
        );
        self.alerts.show(&Alert::from(&stored));
        Some(stored)
    }

    /// Handle a `new_bid` event.
    pub fn handle_new_bid(&self, payload: &Value) {
        match NewBid::deserialize(payload) {
            Ok(bid) => self.publish(LiveUpdate::NewBid(bid)),
            Err(e) => log::warn!("[Dispatcher] Malformed new_bid payload: {}", e),
        }
    }

    /// Handle an `auction:ended` event.
    pub fn handle_auction_ended(&self, payload: &Value) {
        match AuctionEnded::deserialize(payload) {
            Ok(ended) => self.publish(LiveUpdate::AuctionEnded(ended)),
            Err(e) => log::warn!("[Dispatcher] Malformed auction:ended payload: {}", e),
        }
    }

    fn publish(&self, update: LiveUpdate) {
        log::debug!("[Dispatcher] Live update for auction '{}'", update.auction_id());
        // no receivers is fine: nobody is watching an auction page
        let _ = self.live_tx.send(update);
    }

    /// Primary action of an alert: mark read, then open the auction.
    ///
    /// Returns `false` if the notification no longer exists.
    pub fn activate(&self, notification_id: &str) -> bool {
        let auction_id = {
            let mut store = self.store.lock().expect("notification store poisoned");
            let Some(auction_id) = store
                .get(notification_id)
                .map(|n| n.auction_id().to_string())
            else {
                log::debug!("[Dispatcher] Alert for vanished notification {}", notification_id);
                return false;
            };
            store.mark_read(notification_id);
            auction_id
        };

        if !auction_id.is_empty() {
            self.navigator.navigate(&auction_route(&auction_id));
        }
        true
    }
}
