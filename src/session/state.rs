//! Locally cached session identity.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::lenient::required_id;

/// The signed-in user as reported by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User id; owner key of the notification namespace.
    #[serde(deserialize_with = "required_id")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Email, when the server shares it.
    #[serde(default)]
    pub email: Option<String>,
}

/// Identity cache plus the exemption flag, shared by every session-aware
/// component. Observers get identity changes through [`Self::watch`].
#[derive(Debug)]
pub struct SessionState {
    identity: watch::Sender<Option<Identity>>,
    exempt: AtomicBool,
}

impl SessionState {
    /// Signed-out state.
    pub fn new(exempt: bool) -> Self {
        Self {
            identity: watch::channel(None).0,
            exempt: AtomicBool::new(exempt),
        }
    }

    /// Cached identity.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Cached user id.
    pub fn user_id(&self) -> Option<String> {
        self.identity.borrow().as_ref().map(|i| i.id.clone())
    }

    /// Replace the cached identity. Observers are notified only when the
    /// user id actually changes.
    pub fn set_identity(&self, identity: Option<Identity>) {
        self.identity.send_if_modified(|current| {
            let changed = current.as_ref().map(|i| &i.id) != identity.as_ref().map(|i| &i.id);
            *current = identity;
            changed
        });
    }

    /// Drop the cached identity.
    pub fn purge(&self) {
        self.set_identity(None);
    }

    /// Observe identity changes.
    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    /// Whether this is a shared demo/analysis session.
    pub fn is_exempt(&self) -> bool {
        self.exempt.load(Ordering::Acquire)
    }

    /// Toggle the exemption flag.
    pub fn set_exempt(&self, exempt: bool) {
        self.exempt.store(exempt, Ordering::Release);
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> Identity {
        Identity {
            id: id.into(),
            name: id.to_uppercase(),
            email: None,
        }
    }

    #[test]
    fn test_identity_accepts_numeric_id() {
        let identity: Identity = serde_json::from_str(r#"{"id": 42, "name": "Ana"}"#).unwrap();
        assert_eq!(identity.id, "42");
        assert!(serde_json::from_str::<Identity>(r#"{"id": null}"#).is_err());
    }

    #[test]
    fn test_watch_fires_only_on_user_change() {
        let state = SessionState::default();
        let mut rx = state.watch();
        assert!(!rx.has_changed().unwrap());

        state.set_identity(Some(user("a")));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        let mut renamed = user("a");
        renamed.name = "Renamed".into();
        state.set_identity(Some(renamed));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(state.identity().unwrap().name, "Renamed");

        state.purge();
        assert!(rx.has_changed().unwrap());
        assert_eq!(state.user_id(), None);
    }

    #[test]
    fn test_exempt_flag() {
        let state = SessionState::new(true);
        assert!(state.is_exempt());
        state.set_exempt(false);
        assert!(!state.is_exempt());
    }
}
