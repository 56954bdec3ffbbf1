//! Notification records and the closed notification taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a notification.
///
/// Unrecognized or missing server tags become [`NotificationKind::Unknown`]
/// instead of being folded into one of the known kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    /// Confirmation of the user's own bid.
    Bid,
    /// Someone outbid the user.
    Outbid,
    /// A new bid on an auction the user owns.
    OwnerNewBid,
    /// The user won an auction.
    AuctionWon,
    /// An auction the user took part in ended.
    AuctionEnded,
    /// Anything else; holds the raw tag (empty when absent).
    Unknown(String),
}

impl NotificationKind {
    /// Map a raw server tag into the taxonomy.
    #[must_use]
    pub fn parse(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some("BID") => Self::Bid,
            Some("OUTBID") => Self::Outbid,
            Some("OWNER_NEW_BID") => Self::OwnerNewBid,
            Some("AUCTION_WON") => Self::AuctionWon,
            Some("AUCTION_ENDED") => Self::AuctionEnded,
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown(String::new()),
        }
    }

    /// Wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bid => "BID",
            Self::Outbid => "OUTBID",
            Self::OwnerNewBid => "OWNER_NEW_BID",
            Self::AuctionWon => "AUCTION_WON",
            Self::AuctionEnded => "AUCTION_ENDED",
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether the server tag was not recognized.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Title used when the server sends none.
    #[must_use]
    pub fn fallback_title(&self) -> &'static str {
        match self {
            Self::Bid => "Puja registrada",
            Self::Outbid => "Te han superado",
            Self::OwnerNewBid => "Nueva puja en tu subasta",
            Self::AuctionWon => "¡Has ganado la subasta!",
            Self::AuctionEnded => "Subasta finalizada",
            Self::Unknown(_) => "Notificación",
        }
    }
}

impl From<String> for NotificationKind {
    fn from(tag: String) -> Self {
        Self::parse(Some(&tag))
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(tag) if tag.is_empty() => f.write_str("UNKNOWN"),
            Self::Unknown(tag) => write!(f, "UNKNOWN({tag})"),
            known => f.write_str(known.as_str()),
        }
    }
}

/// Fields supplied when adding a notification; the store fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    /// Kind.
    pub kind: NotificationKind,
    /// Headline.
    pub title: String,
    /// Body.
    pub message: String,
    /// Related auction, empty when none.
    pub auction_id: String,
}

/// A persisted, user-owned notification.
///
/// Everything except `read` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    id: String,
    #[serde(rename = "type")]
    kind: NotificationKind,
    title: String,
    message: String,
    #[serde(default)]
    auction_id: String,
    read: bool,
    created_at: DateTime<Utc>,
    /// Empty when absent in a persisted record; such records never load.
    #[serde(default)]
    owner_user_id: String,
}

impl Notification {
    pub(crate) fn create(draft: NotificationDraft, owner: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: draft.kind,
            title: draft.title,
            message: draft.message,
            auction_id: draft.auction_id,
            read: false,
            created_at: now,
            owner_user_id: owner.to_string(),
        }
    }

    /// Collision-resistant id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Kind.
    pub fn kind(&self) -> &NotificationKind {
        &self.kind
    }

    /// Headline.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Body.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Related auction, empty when none.
    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    /// Whether the user has seen it.
    pub fn is_read(&self) -> bool {
        self.read
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Identity active when it was created.
    pub fn owner_user_id(&self) -> &str {
        &self.owner_user_id
    }

    pub(crate) fn mark_read(&mut self) -> bool {
        let changed = !self.read;
        self.read = true;
        changed
    }

    /// Whether pruning at `now` with `retention` removes it.
    pub(crate) fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.read && now.signed_duration_since(self.created_at) > retention
    }
}
